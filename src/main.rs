use clap::{Parser, Subcommand};
use tracing::{error, info};
use media_upload::{
    config::Config,
    storage::{CloudinaryClient, DeletionTransport},
    types::DeletionToken,
    utils::init_logger,
    widget::WidgetOptions,
};

#[derive(Parser)]
#[command(name = "media-upload", about = "Upload widget and asset deletion tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Delete an uploaded asset using the token returned with the upload
    Delete {
        #[arg(long)]
        token: String,
        /// Public id, only used for logging
        #[arg(long, default_value = "unknown")]
        public_id: String,
    },
    /// Print the widget construction options as JSON
    Options {
        /// Page-level banner preset instead of the form-field preset
        #[arg(long)]
        banner: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger("media_upload=info");

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Delete { token, public_id } => {
            anyhow::ensure!(
                !config.cloudinary.cloud_name.is_empty(),
                "CLOUDINARY_CLOUD_NAME must be set"
            );

            let client = CloudinaryClient::new(&config.cloudinary)?;
            info!(endpoint = %client.endpoint(), public_id = %public_id, "Deleting asset");

            if let Err(e) = client.delete_by_token(&DeletionToken::new(token)).await {
                error!(error = %e, public_id = %public_id, "Deletion failed");
                return Err(e.into());
            }
            info!(public_id = %public_id, "Asset deleted");
        }
        Command::Options { banner } => {
            let options = if banner {
                WidgetOptions::banner(&config.cloudinary)
            } else {
                WidgetOptions::component(&config.cloudinary)
            };
            println!("{}", serde_json::to_string_pretty(&options)?);
        }
    }

    Ok(())
}
