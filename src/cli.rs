use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dlmanager::extractor::LinkCategory;

/// Concurrent download manager
#[derive(Parser, Debug)]
#[command(name = "dlm")]
#[command(version)]
#[command(about = "Concurrent, resumable file downloads with link extraction", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download one or more files
    Get {
        /// File URLs to download
        #[arg(required = true, value_name = "URL")]
        #[arg(value_hint = clap::ValueHint::Url)]
        urls: Vec<String>,

        /// Directory downloads are written to
        #[arg(long, value_name = "DIR", default_value = ".")]
        #[arg(value_hint = clap::ValueHint::DirPath)]
        output_dir: PathBuf,

        /// Maximum simultaneous transfers
        #[arg(long, value_name = "N", default_value_t = 5)]
        concurrency: usize,
    },
    /// Extract links from a web page
    Links {
        /// Page URL to scan
        #[arg(value_name = "URL")]
        #[arg(value_hint = clap::ValueHint::Url)]
        url: String,

        /// Which links to keep
        #[arg(long, value_enum, default_value_t = LinkCategory::AllLinks)]
        filter: LinkCategory,
    },
}
