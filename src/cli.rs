//! CLI argument definitions using clap derive macros.

use clap::Parser;

use pagewire::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CURSOR_PARAM, DEFAULT_NEXT_FIELD, DEFAULT_PAGE_SIZE,
    DEFAULT_SIZE_PARAM, DEFAULT_TOTAL_FIELD, READ_TIMEOUT_SECS,
};

/// Walk a paginated JSON API and print every page.
///
/// Pagewire requests the first page of a collection, follows the server's
/// continuation cursors until the last page, and prints each page body as one
/// JSON line on stdout.
#[derive(Parser, Debug)]
#[command(name = "pagewire")]
#[command(author, version, about)]
pub struct Args {
    /// Collection URL (the first page is requested from it)
    pub url: String,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Items per page
    #[arg(short = 's', long, default_value_t = DEFAULT_PAGE_SIZE, value_parser = clap::value_parser!(u32).range(1..))]
    pub page_size: u32,

    /// Stop after this many pages
    #[arg(short = 'm', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_pages: Option<u32>,

    /// Connection timeout in seconds (1-3600)
    #[arg(long, default_value_t = CONNECT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: u64,

    /// Read timeout in seconds (1-3600)
    #[arg(long, default_value_t = READ_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout: u64,

    /// Treat non-2xx responses as pages instead of errors
    #[arg(long)]
    pub keep_http_errors: bool,

    /// Query parameter carrying the page size
    #[arg(long, default_value = DEFAULT_SIZE_PARAM)]
    pub size_param: String,

    /// Query parameter carrying the continuation cursor
    #[arg(long, default_value = DEFAULT_CURSOR_PARAM)]
    pub cursor_param: String,

    /// Body field holding the total item count
    #[arg(long, default_value = DEFAULT_TOTAL_FIELD)]
    pub total_field: String,

    /// Body field holding the next cursor
    #[arg(long, default_value = DEFAULT_NEXT_FIELD)]
    pub next_field: String,
}
