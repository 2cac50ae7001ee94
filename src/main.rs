use std::path::PathBuf;

use clap::Parser;
use log::error;
use portal_autologin_lib::{run, RunOptions};

#[derive(Parser, Debug)]
#[command(name = "portal-autologin")]
#[command(version)]
#[command(about = "Keeps this machine logged into the campus captive portal")]
struct Args {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, env = "PORTAL_AUTOLOGIN_CONFIG")]
    config: Option<PathBuf>,

    /// WebDriver server, e.g. a running chromedriver
    #[arg(long)]
    webdriver_url: Option<String>,

    /// Show the browser window
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_headless: bool,

    /// Run a single login cycle and exit
    #[arg(long, action = clap::ArgAction::SetTrue)]
    once: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let args = Args::parse();
    let options = RunOptions {
        config_path: args.config,
        webdriver_url: args.webdriver_url,
        no_headless: args.no_headless,
        once: args.once,
    };

    // Exit directly: a pending stdin read would otherwise hold up runtime shutdown.
    match run(options).await {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    }
}
