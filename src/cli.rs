use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "usage-api",
    version,
    about = "Usage analytics API over household utility telemetry"
)]
pub struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
    #[arg(long, default_value_t = 4567)]
    pub port: u16,
}
