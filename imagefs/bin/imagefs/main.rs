mod handlers;

use clap::Parser;
use imagefs::{
    cli::{ImagefsArgs, ImagefsSubcommand},
    ImageResult,
};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ImageResult<()> {
    let args = ImagefsArgs::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.subcommand {
        ImagefsSubcommand::Convert {
            image,
            output,
            load,
        } => {
            handlers::convert_subcommand(image, output, load.into_options()).await?;
        }
        ImagefsSubcommand::Ls { image, path, load } => {
            handlers::ls_subcommand(image, path, load.into_options()).await?;
        }
        ImagefsSubcommand::Cat { image, path, load } => {
            handlers::cat_subcommand(image, path, load.into_options()).await?;
        }
        ImagefsSubcommand::Hash { image, load } => {
            handlers::hash_subcommand(image, load.into_options()).await?;
        }
    }

    Ok(())
}
