use clap::Parser;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value_t = Config::default_path().to_string())]
    pub config: String,

    /// Override the HTTP port from the config
    #[arg(short, long)]
    pub port: Option<u16>,

    /// List available cameras and exit
    #[arg(long)]
    pub list_cameras: bool,
}
