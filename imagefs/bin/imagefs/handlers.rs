use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use imagefs::{cli::AnsiStyles, load, write_tar, ImageError, ImageResult, LoadOptions, LoadedImage};
use layerfs::{fingerprint, FileSystem, SymlinkFileSystem};
use tracing::info;
use typed_path::Utf8UnixPathBuf;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const OUTPUT_EXTENSION: &str = "tar";

const IMAGE_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".tar"];

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

pub async fn convert_subcommand(
    image: PathBuf,
    output: Option<PathBuf>,
    options: LoadOptions,
) -> ImageResult<()> {
    let output = output.unwrap_or_else(|| default_output(&image));
    let loaded = load(&image, options).await?;

    let written = output.clone();
    with_image(loaded, move |image| {
        let file = BufWriter::new(File::create(&written)?);
        write_tar(image.filesystem()?, file)?
            .into_inner()
            .map_err(|e| e.into_error())?
            .sync_all()?;
        Ok(())
    })
    .await?;

    info!(output = %output.display(), "wrote merged root file system");
    Ok(())
}

pub async fn ls_subcommand(
    image: PathBuf,
    path: Utf8UnixPathBuf,
    options: LoadOptions,
) -> ImageResult<()> {
    let loaded = load(&image, options).await?;

    with_image(loaded, move |image| {
        let fs = image.filesystem()?;
        let mut stdout = io::stdout().lock();

        for entry in fs.read_directory(&path)? {
            let name = entry.get_name().as_str();
            if entry.is_dir() {
                writeln!(stdout, "{}/", name.literal())?;
            } else if entry.is_symlink() {
                let target = fs.read_link(&path.join(name))?;
                writeln!(stdout, "{} -> {}", name.placeholder(), target)?;
            } else {
                writeln!(stdout, "{name}")?;
            }
        }

        Ok(())
    })
    .await
}

pub async fn cat_subcommand(
    image: PathBuf,
    path: Utf8UnixPathBuf,
    options: LoadOptions,
) -> ImageResult<()> {
    let loaded = load(&image, options).await?;

    with_image(loaded, move |image| {
        let mut reader = image.filesystem()?.open(&path)?;
        let mut stdout = io::stdout().lock();
        io::copy(&mut reader, &mut stdout)?;
        stdout.flush()?;
        Ok(())
    })
    .await
}

pub async fn hash_subcommand(image: PathBuf, options: LoadOptions) -> ImageResult<()> {
    let loaded = load(&image, options).await?;

    with_image(loaded, |image| {
        println!("{}", fingerprint(image.filesystem()?)?);
        Ok(())
    })
    .await
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Runs `f` against the loaded image on the blocking pool, then closes the image. The error of
/// `f` takes precedence over a failure to close.
async fn with_image<F>(mut image: LoadedImage, f: F) -> ImageResult<()>
where
    F: FnOnce(&LoadedImage) -> ImageResult<()> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let result = f(&image);
        let closed = image.close();
        result.and(closed)
    })
    .await
    .map_err(ImageError::from)?
}

/// The file name of the image without its archive extension, with a `.tar` extension, in the
/// current directory.
fn default_output(image: &Path) -> PathBuf {
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rootfs".to_string());

    let stem = if image.is_dir() {
        name.as_str()
    } else {
        IMAGE_EXTENSIONS
            .iter()
            .find_map(|ext| name.strip_suffix(ext))
            .or_else(|| name.rsplit_once('.').map(|(stem, _)| stem))
            .filter(|stem| !stem.is_empty())
            .unwrap_or(name.as_str())
    };

    PathBuf::from(format!("{stem}.{OUTPUT_EXTENSION}"))
}
