use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use typed_path::Utf8UnixPathBuf;

use crate::{cli::styles, DefaultManifest, LoadOptions, Platform};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `imagefs` merges the layers of a Docker or OCI image into a single root file system
#[derive(Debug, Parser)]
#[command(name = "imagefs", author, about, version, styles=styles::styles())]
pub struct ImagefsArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: ImagefsSubcommand,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum ImagefsSubcommand {
    /// Write the merged root file system of an image as a tar archive
    #[command(name = "convert")]
    Convert {
        /// The image directory or tarball
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Where to write the archive. Defaults to the image name with a `.tar` extension
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,

        /// Image selection
        #[command(flatten)]
        load: LoadArgs,
    },

    /// List a directory of the merged file system
    #[command(name = "ls")]
    Ls {
        /// The image directory or tarball
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// The directory to list
        #[arg(value_name = "PATH", default_value = "/")]
        path: Utf8UnixPathBuf,

        /// Image selection
        #[command(flatten)]
        load: LoadArgs,
    },

    /// Print a file of the merged file system
    #[command(name = "cat")]
    Cat {
        /// The image directory or tarball
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// The file to print
        #[arg(value_name = "PATH")]
        path: Utf8UnixPathBuf,

        /// Image selection
        #[command(flatten)]
        load: LoadArgs,
    },

    /// Print the fingerprint of the merged file system
    #[command(name = "hash")]
    Hash {
        /// The image directory or tarball
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Image selection
        #[command(flatten)]
        load: LoadArgs,
    },
}

/// Options selecting which image in an archive is loaded
#[derive(Debug, Clone, Default, Args)]
pub struct LoadArgs {
    /// The tag or reference name of the image to load
    #[arg(short, long)]
    pub reference: Option<String>,

    /// Only accept an image built for this platform, as `os/arch[/variant]`
    #[arg(short, long, value_name = "OS/ARCH")]
    pub platform: Option<Platform>,

    /// Use the first manifest when no reference is given, even if there are several
    #[arg(long)]
    pub first: bool,

    /// The directory in which scratch files are created
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl LoadArgs {
    /// Converts the arguments into load options.
    pub fn into_options(self) -> LoadOptions {
        let mut options = LoadOptions::default();
        options
            .set_reference(self.reference)
            .set_platform(self.platform)
            .set_scratch_dir(self.scratch_dir);

        if self.first {
            options.set_default_manifest(Some(DefaultManifest::First));
        }

        options
    }
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
