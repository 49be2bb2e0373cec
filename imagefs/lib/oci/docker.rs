use layerfs::FileSystem;
use serde::Deserialize;
use tracing::debug;
use typed_path::Utf8UnixPathBuf;

use crate::{DefaultManifest, ImageError, ImageResult, LoadOptions};

use super::{check_platform, read_json, select_default, LayerBlob, ManifestResolver};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Resolves images in the legacy Docker archive layout, as written by `docker save`.
///
/// The root holds a `manifest.json` array. Each manifest names a config file and the layer
/// tarballs; the config lists the layers' uncompressed digests (`rootfs.diff_ids`), base first.
/// Without a reference the archive must hold a single manifest, unless the options say otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerResolver;

/// One entry of `manifest.json`.
#[derive(Debug, Clone, Deserialize)]
struct DockerManifest {
    #[serde(rename = "Config")]
    config: String,

    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,

    #[serde(rename = "Layers", default)]
    layers: Vec<String>,
}

/// The parts of an image config that select and order layers.
#[derive(Debug, Clone, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    architecture: String,

    #[serde(default)]
    os: String,

    rootfs: DockerRootFs,
}

#[derive(Debug, Clone, Deserialize)]
struct DockerRootFs {
    #[serde(default)]
    diff_ids: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ManifestResolver for DockerResolver {
    fn default_manifest(&self) -> DefaultManifest {
        DefaultManifest::RequireUnique
    }

    fn resolve(&self, root: &dyn FileSystem, options: &LoadOptions) -> ImageResult<Vec<LayerBlob>> {
        let manifests: Vec<DockerManifest> = read_json(root, super::DOCKER_MANIFEST_FILENAME)?;
        if manifests.is_empty() {
            return Err(ImageError::NoManifests);
        }

        let manifest = match options.get_reference() {
            Some(reference) => manifests
                .iter()
                .find(|m| m.repo_tags.iter().flatten().any(|tag| tag == reference))
                .ok_or_else(|| ImageError::ManifestNotFound(reference.clone()))?,
            None => {
                let policy = options
                    .get_default_manifest()
                    .unwrap_or(self.default_manifest());
                &manifests[select_default(manifests.len(), policy)?]
            }
        };

        let config: DockerConfig = read_json(root, &manifest.config)?;
        check_platform(options, &config.os, &config.architecture)?;

        let diff_ids = &config.rootfs.diff_ids;
        let layers = diff_ids
            .iter()
            .enumerate()
            .map(|(index, diff_id)| {
                let listed = (manifest.layers.len() == diff_ids.len())
                    .then(|| manifest.layers[index].as_str());
                LayerBlob::new(diff_id.clone(), layer_candidates(diff_id, listed))
            })
            .collect::<Vec<_>>();

        debug!(
            config = %manifest.config,
            layers = layers.len(),
            "resolved docker manifest"
        );

        Ok(layers)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The paths a layer may be stored under: the path listed in the manifest, then `<hex>.tar` and
/// `<hex>.tar.gz`, since producers disagree on the naming.
fn layer_candidates(diff_id: &str, listed: Option<&str>) -> Vec<Utf8UnixPathBuf> {
    let encoded = diff_id
        .split_once(':')
        .map(|(_, encoded)| encoded)
        .unwrap_or(diff_id);

    let mut candidates: Vec<Utf8UnixPathBuf> = Vec::new();
    let paths = listed
        .map(str::to_string)
        .into_iter()
        .chain([format!("{encoded}.tar"), format!("{encoded}.tar.gz")]);

    for path in paths {
        let path = Utf8UnixPathBuf::from(path);
        if !candidates.contains(&path) {
            candidates.push(path);
        }
    }

    candidates
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use layerfs::{ErrorKind, MemoryFileSystem};

    use crate::Platform;

    use super::*;

    #[test]
    fn test_docker_resolves_layers_base_first() -> anyhow::Result<()> {
        let root = helper::image(&[("app:1", "amd64", vec!["aaa", "bbb"])])?;

        let layers = DockerResolver.resolve(&root, &LoadOptions::default())?;

        let digests: Vec<_> = layers.iter().map(|l| l.get_digest().as_str()).collect();
        assert_eq!(digests, vec!["sha256:aaa", "sha256:bbb"]);

        let candidates: Vec<_> = layers[0]
            .get_candidates()
            .iter()
            .map(|c| c.as_str())
            .collect();
        assert_eq!(candidates, vec!["aaa/layer.tar", "aaa.tar", "aaa.tar.gz"]);

        Ok(())
    }

    #[test]
    fn test_docker_candidates_without_listed_layers() {
        let candidates = layer_candidates("sha256:ccc", None);
        let candidates: Vec<_> = candidates.iter().map(|c| c.as_str()).collect();
        assert_eq!(candidates, vec!["ccc.tar", "ccc.tar.gz"]);

        let candidates = layer_candidates("sha256:ccc", Some("ccc.tar"));
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_docker_selects_by_tag() -> anyhow::Result<()> {
        let root = helper::image(&[
            ("app:1", "amd64", vec!["aaa"]),
            ("app:2", "amd64", vec!["bbb"]),
        ])?;

        let options = LoadOptions::builder().reference("app:2").build();
        let layers = DockerResolver.resolve(&root, &options)?;
        assert_eq!(layers[0].get_digest(), "sha256:bbb");

        let options = LoadOptions::builder().reference("app:3").build();
        let err = DockerResolver.resolve(&root, &options).unwrap_err();
        assert!(matches!(err, ImageError::ManifestNotFound(ref r) if r == "app:3"));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        Ok(())
    }

    #[test]
    fn test_docker_requires_reference_for_several_manifests() -> anyhow::Result<()> {
        let root = helper::image(&[
            ("app:1", "amd64", vec!["aaa"]),
            ("app:2", "amd64", vec!["bbb"]),
        ])?;

        let err = DockerResolver
            .resolve(&root, &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, ImageError::AmbiguousManifest(2)));

        let options = LoadOptions::builder()
            .default_manifest(DefaultManifest::First)
            .build();
        let layers = DockerResolver.resolve(&root, &options)?;
        assert_eq!(layers[0].get_digest(), "sha256:aaa");

        Ok(())
    }

    #[test]
    fn test_docker_platform_filter() -> anyhow::Result<()> {
        let root = helper::image(&[("app:1", "arm64", vec!["aaa"])])?;

        let options = LoadOptions::builder()
            .platform("linux/arm64".parse::<Platform>()?)
            .build();
        assert_eq!(DockerResolver.resolve(&root, &options)?.len(), 1);

        let options = LoadOptions::builder()
            .platform("linux/amd64".parse::<Platform>()?)
            .build();
        let err = DockerResolver.resolve(&root, &options).unwrap_err();
        assert!(matches!(err, ImageError::PlatformMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        Ok(())
    }

    #[test]
    fn test_docker_empty_manifest_list() -> anyhow::Result<()> {
        let mut root = MemoryFileSystem::new();
        root.create_file("manifest.json", "[]")?;

        assert!(matches!(
            DockerResolver.resolve(&root, &LoadOptions::default()),
            Err(ImageError::NoManifests)
        ));

        Ok(())
    }

    mod helper {
        use super::*;

        /// Builds a Docker image root with one manifest per `(tag, arch, diff ids)`.
        pub(super) fn image(
            manifests: &[(&str, &str, Vec<&str>)],
        ) -> anyhow::Result<MemoryFileSystem> {
            let mut root = MemoryFileSystem::new();
            let mut entries = Vec::new();

            for (index, (tag, arch, layers)) in manifests.iter().enumerate() {
                let config_path = format!("config{index}.json");
                let config = serde_json::json!({
                    "architecture": arch,
                    "os": "linux",
                    "rootfs": {
                        "type": "layers",
                        "diff_ids": layers
                            .iter()
                            .map(|l| format!("sha256:{l}"))
                            .collect::<Vec<_>>(),
                    },
                });
                root.create_file(&config_path, config.to_string())?;

                entries.push(serde_json::json!({
                    "Config": config_path,
                    "RepoTags": [tag],
                    "Layers": layers.iter().map(|l| format!("{l}/layer.tar")).collect::<Vec<_>>(),
                }));
            }

            root.create_file("manifest.json", serde_json::Value::from(entries).to_string())?;
            Ok(root)
        }
    }
}
