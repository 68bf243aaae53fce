//! CLI argument definitions

use clap::Parser;

#[derive(Parser)]
#[command(name = "auditqa")]
#[command(
    author,
    version,
    about = "세무조사 적출사례 질의응답 - hybrid retrieval over tax-audit case documents"
)]
pub struct Cli {
    /// Query to answer; omit for the interactive loop
    pub query: Vec<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}
