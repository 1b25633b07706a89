use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Snapshot file (JSON heap mirror), or [synthetic]leak_chain_<N> for a
    /// generated heap.
    pub path: String,

    /// Compute the retained heap size of each leaking candidate.
    #[arg(short = 'r', long, default_value_t = false)]
    pub retained_size: bool,

    /// JSON exclusion catalog; the built-in defaults apply when omitted.
    #[arg(short = 'x', long)]
    pub exclusions: Option<String>,

    /// Run with an empty exclusion catalog.
    #[arg(long, default_value_t = false)]
    pub no_default_exclusions: bool,
}
