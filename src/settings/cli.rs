use super::Parser;

#[derive(Parser, Debug)]
#[command(about = "Token session manager for the storefront")]
pub struct Cli {
    /// Path to a TOML settings file.
    #[arg(long)]
    pub settings: Option<String>,
}
