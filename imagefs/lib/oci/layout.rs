use layerfs::FileSystem;
use oci_spec::image::{
    Descriptor, ImageConfiguration, ImageIndex, ImageManifest, MediaType, OciLayout,
};
use tracing::debug;
use typed_path::Utf8UnixPathBuf;

use crate::{DefaultManifest, ImageError, ImageResult, LoadOptions};

use super::{check_platform, read_json, select_default, LayerBlob, ManifestResolver};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The only supported `imageLayoutVersion`.
pub const OCI_LAYOUT_VERSION: &str = "1.0.0";

/// The annotation holding a manifest's reference name.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

const OCI_INDEX_FILENAME: &str = "index.json";

/// How many nested image indexes are followed before giving up.
const MAX_INDEX_DEPTH: usize = 8;

const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Resolves images in the OCI image layout.
///
/// The manifest is chosen from `index.json` by its `org.opencontainers.image.ref.name`
/// annotation, or by the default policy (first listed, unless the options say otherwise). When
/// the chosen descriptor is itself an image index, the first manifest matching the platform
/// filter is used. Layers live under `blobs/<algorithm>/<encoded>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OciResolver;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ManifestResolver for OciResolver {
    fn default_manifest(&self) -> DefaultManifest {
        DefaultManifest::First
    }

    fn resolve(&self, root: &dyn FileSystem, options: &LoadOptions) -> ImageResult<Vec<LayerBlob>> {
        let layout: OciLayout = read_json(root, super::OCI_LAYOUT_FILENAME)?;
        if layout.image_layout_version() != OCI_LAYOUT_VERSION {
            return Err(ImageError::UnsupportedLayoutVersion(
                layout.image_layout_version().to_string(),
            ));
        }

        let index: ImageIndex = read_json(root, OCI_INDEX_FILENAME)?;
        let manifests = index.manifests();

        let mut descriptor = match options.get_reference() {
            Some(reference) => manifests
                .iter()
                .find(|d| ref_name(d) == Some(reference.as_str()))
                .ok_or_else(|| ImageError::ManifestNotFound(reference.clone()))?,
            None => {
                let policy = options
                    .get_default_manifest()
                    .unwrap_or(self.default_manifest());
                &manifests[select_default(manifests.len(), policy)?]
            }
        }
        .clone();

        for _ in 0..MAX_INDEX_DEPTH {
            if !is_index(&descriptor) {
                break;
            }

            debug!(digest = %descriptor.digest(), "descending into nested image index");
            let nested_path = blob_path(&descriptor.digest().to_string());
            let nested: ImageIndex = read_json(root, nested_path.as_str())?;
            descriptor = nested
                .manifests()
                .iter()
                .find(|d| platform_accepts(options, d))
                .cloned()
                .ok_or_else(|| {
                    ImageError::ManifestNotFound(format!(
                        "{} for platform {}",
                        descriptor.digest(),
                        options
                            .get_platform()
                            .as_ref()
                            .map(|p| p.to_string())
                            .unwrap_or_else(|| "any".to_string())
                    ))
                })?;
        }

        if is_index(&descriptor) {
            return Err(ImageError::ManifestNotFound(format!(
                "{} nests image indexes too deeply",
                descriptor.digest()
            )));
        }

        let manifest: ImageManifest =
            read_json(root, blob_path(&descriptor.digest().to_string()).as_str())?;
        let config: ImageConfiguration =
            read_json(root, blob_path(&manifest.config().digest().to_string()).as_str())?;
        check_platform(
            options,
            &config.os().to_string(),
            &config.architecture().to_string(),
        )?;

        let layers: Vec<LayerBlob> = manifest
            .layers()
            .iter()
            .map(|layer| {
                let digest = layer.digest().to_string();
                let path = blob_path(&digest);
                LayerBlob::new(digest, vec![path])
            })
            .collect();

        debug!(
            manifest = %descriptor.digest(),
            layers = layers.len(),
            "resolved oci manifest"
        );

        Ok(layers)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Maps a digest such as `sha256:abc` to its blob path, `blobs/sha256/abc`.
pub fn blob_path(digest: &str) -> Utf8UnixPathBuf {
    match digest.split_once(':') {
        Some((algorithm, encoded)) => Utf8UnixPathBuf::from(format!("blobs/{algorithm}/{encoded}")),
        None => Utf8UnixPathBuf::from(format!("blobs/{digest}")),
    }
}

fn ref_name(descriptor: &Descriptor) -> Option<&str> {
    descriptor
        .annotations()
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_REF_NAME))
        .map(String::as_str)
}

fn is_index(descriptor: &Descriptor) -> bool {
    match descriptor.media_type() {
        MediaType::ImageIndex => true,
        MediaType::Other(other) => other == DOCKER_MANIFEST_LIST_MEDIA_TYPE,
        _ => false,
    }
}

/// Whether a descriptor in a nested index is acceptable. Descriptors without a platform are
/// accepted, and so is everything when there is no filter.
fn platform_accepts(options: &LoadOptions, descriptor: &Descriptor) -> bool {
    match (options.get_platform(), descriptor.platform()) {
        (Some(filter), Some(platform)) => filter.matches(
            &platform.os().to_string(),
            &platform.architecture().to_string(),
        ),
        _ => true,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use layerfs::{ErrorKind, MemoryFileSystem};
    use serde_json::json;

    use crate::Platform;

    use super::*;

    #[test]
    fn test_oci_blob_path() {
        assert_eq!(blob_path("sha256:abc").as_str(), "blobs/sha256/abc");
        assert_eq!(blob_path("sha512:def").as_str(), "blobs/sha512/def");
    }

    #[test]
    fn test_oci_resolves_first_manifest_by_default() -> anyhow::Result<()> {
        let mut root = helper::layout()?;
        let first = helper::add_image(&mut root, "amd64", &["1", "2"])?;
        let second = helper::add_image(&mut root, "amd64", &["3"])?;
        helper::write_index(
            &mut root,
            vec![
                helper::manifest_descriptor(&first, Some("app:1"), None),
                helper::manifest_descriptor(&second, Some("app:2"), None),
            ],
        )?;

        let layers = OciResolver.resolve(&root, &LoadOptions::default())?;
        let paths: Vec<_> = layers
            .iter()
            .map(|l| l.get_candidates()[0].to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                format!("blobs/sha256/{}", helper::digest_of("1")),
                format!("blobs/sha256/{}", helper::digest_of("2")),
            ]
        );

        let options = LoadOptions::builder()
            .default_manifest(DefaultManifest::RequireUnique)
            .build();
        assert!(matches!(
            OciResolver.resolve(&root, &options),
            Err(ImageError::AmbiguousManifest(2))
        ));

        Ok(())
    }

    #[test]
    fn test_oci_selects_by_ref_name() -> anyhow::Result<()> {
        let mut root = helper::layout()?;
        let first = helper::add_image(&mut root, "amd64", &["1"])?;
        let second = helper::add_image(&mut root, "amd64", &["2"])?;
        helper::write_index(
            &mut root,
            vec![
                helper::manifest_descriptor(&first, Some("app:1"), None),
                helper::manifest_descriptor(&second, Some("app:2"), None),
            ],
        )?;

        let options = LoadOptions::builder().reference("app:2").build();
        let layers = OciResolver.resolve(&root, &options)?;
        assert_eq!(layers.len(), 1);
        assert_eq!(
            layers[0].get_digest(),
            &format!("sha256:{}", helper::digest_of("2"))
        );

        let options = LoadOptions::builder().reference("app:9").build();
        let err = OciResolver.resolve(&root, &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        Ok(())
    }

    #[test]
    fn test_oci_rejects_unknown_layout_version() -> anyhow::Result<()> {
        let mut root = MemoryFileSystem::new();
        root.create_file("oci-layout", json!({"imageLayoutVersion": "2.0.0"}).to_string())?;

        let err = OciResolver
            .resolve(&root, &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, ImageError::UnsupportedLayoutVersion(ref v) if v == "2.0.0"));
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        Ok(())
    }

    #[test]
    fn test_oci_descends_into_nested_index() -> anyhow::Result<()> {
        let mut root = helper::layout()?;
        let amd = helper::add_image(&mut root, "amd64", &["amd"])?;
        let arm = helper::add_image(&mut root, "arm64", &["arm"])?;

        let nested = json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.index.v1+json",
            "manifests": [
                helper::manifest_descriptor(&amd, None, Some("amd64")),
                helper::manifest_descriptor(&arm, None, Some("arm64")),
            ],
        })
        .to_string();
        let nested_digest = helper::add_blob(&mut root, &nested)?;
        helper::write_index(
            &mut root,
            vec![json!({
                "mediaType": "application/vnd.oci.image.index.v1+json",
                "digest": format!("sha256:{nested_digest}"),
                "size": nested.len(),
                "annotations": { ANNOTATION_REF_NAME: "multi" },
            })],
        )?;

        let options = LoadOptions::builder()
            .platform("linux/arm64".parse::<Platform>()?)
            .build();
        let layers = OciResolver.resolve(&root, &options)?;
        assert_eq!(
            layers[0].get_digest(),
            &format!("sha256:{}", helper::digest_of("arm"))
        );

        let options = LoadOptions::builder()
            .platform("linux/s390x".parse::<Platform>()?)
            .build();
        assert_eq!(
            OciResolver.resolve(&root, &options).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        Ok(())
    }

    #[test]
    fn test_oci_platform_mismatch() -> anyhow::Result<()> {
        let mut root = helper::layout()?;
        let image = helper::add_image(&mut root, "amd64", &["1"])?;
        helper::write_index(&mut root, vec![helper::manifest_descriptor(&image, None, None)])?;

        let options = LoadOptions::builder()
            .platform("linux/arm64".parse::<Platform>()?)
            .build();
        assert!(matches!(
            OciResolver.resolve(&root, &options),
            Err(ImageError::PlatformMismatch { .. })
        ));

        Ok(())
    }

    mod helper {
        use sha2::{Digest as _, Sha256};

        use super::*;

        pub(super) fn digest_of(content: &str) -> String {
            hex::encode(Sha256::digest(content.as_bytes()))
        }

        pub(super) fn layout() -> anyhow::Result<MemoryFileSystem> {
            let mut root = MemoryFileSystem::new();
            root.create_file(
                "oci-layout",
                json!({"imageLayoutVersion": OCI_LAYOUT_VERSION}).to_string(),
            )?;
            Ok(root)
        }

        pub(super) fn add_blob(
            root: &mut MemoryFileSystem,
            content: &str,
        ) -> anyhow::Result<String> {
            let digest = digest_of(content);
            root.create_file(format!("blobs/sha256/{digest}"), content)?;
            Ok(digest)
        }

        /// Adds a config and manifest whose layers are the digests of `layers`, returning the
        /// manifest digest and size.
        pub(super) fn add_image(
            root: &mut MemoryFileSystem,
            arch: &str,
            layers: &[&str],
        ) -> anyhow::Result<(String, usize)> {
            let config = json!({
                "architecture": arch,
                "os": "linux",
                "rootfs": { "type": "layers", "diff_ids": [] },
            })
            .to_string();
            let config_digest = add_blob(root, &config)?;

            let manifest = json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "config": {
                    "mediaType": "application/vnd.oci.image.config.v1+json",
                    "digest": format!("sha256:{config_digest}"),
                    "size": config.len(),
                },
                "layers": layers.iter().map(|l| json!({
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": format!("sha256:{}", digest_of(l)),
                    "size": l.len(),
                })).collect::<Vec<_>>(),
            })
            .to_string();
            let digest = add_blob(root, &manifest)?;
            Ok((digest, manifest.len()))
        }

        pub(super) fn manifest_descriptor(
            (digest, size): &(String, usize),
            ref_name: Option<&str>,
            arch: Option<&str>,
        ) -> serde_json::Value {
            let mut descriptor = json!({
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": format!("sha256:{digest}"),
                "size": size,
            });
            if let Some(ref_name) = ref_name {
                descriptor["annotations"] = json!({ ANNOTATION_REF_NAME: ref_name });
            }
            if let Some(arch) = arch {
                descriptor["platform"] = json!({ "os": "linux", "architecture": arch });
            }
            descriptor
        }

        pub(super) fn write_index(
            root: &mut MemoryFileSystem,
            manifests: Vec<serde_json::Value>,
        ) -> anyhow::Result<()> {
            let index = json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.index.v1+json",
                "manifests": manifests,
            });
            root.create_file("index.json", index.to_string())?;
            Ok(())
        }
    }
}
