//! `imagefs` loads Docker and OCI container images into a single merged, read-only file system.
//!
//! # Overview
//!
//! An image is read from a directory or a tarball (optionally gzip compressed) in either the
//! legacy `docker save` layout or the OCI image layout. Loading an image:
//! - detects the format and resolves the manifest selected by a reference and platform filter
//! - decompresses every layer into a scratch file and indexes it as a tar archive
//! - merges the layers, base first, with [`layerfs::OverlayFileSystem`]
//!
//! The result is exposed through the read-only [`layerfs::FileSystem`] and
//! [`layerfs::SymlinkFileSystem`] capabilities, which is all an encoder needs to walk and
//! serialize the tree. [`write_tar`] is one such encoder.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use imagefs::{load, write_tar, LoadOptions, Platform};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let options = LoadOptions::builder()
//!         .reference("docker.io/library/alpine:3.20")
//!         .platform("linux/amd64".parse::<Platform>()?)
//!         .build();
//!
//!     let mut image = load("alpine.oci.tar", options).await?;
//!     write_tar(image.filesystem()?, std::fs::File::create("rootfs.tar")?)?;
//!     image.close()?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cli`] - Command-line argument parsing and styling for the `imagefs` binary
//! - [`oci`] - Format detection and the Docker and OCI manifest resolvers

#![warn(missing_docs)]

mod config;
mod decompress;
mod error;
mod export;
mod image;
mod loader;

pub mod cli;
pub mod oci;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use config::*;
pub use decompress::*;
pub use error::*;
pub use export::*;
pub use image::*;
pub use loader::*;
