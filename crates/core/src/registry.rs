//! Provider registry protocol documents.
//!
//! Upstream types follow the hashicorp provider registry API responses,
//! https://developer.hashicorp.com/terraform/internals/provider-registry-protocol
//! and mirror responses follow the provider network mirror protocol. Field
//! names are a client compatibility contract and must not be renamed.

use crate::ArtifactDigest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

// Registry response for "List Available Versions".

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderVersions {
    pub versions: Vec<ProviderVersionItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderVersionItem {
    pub version: String,
    #[serde(default)]
    pub protocols: Vec<String>,
    pub platforms: Vec<ProviderPlatform>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderPlatform {
    pub os: String,
    pub arch: String,
}

impl ProviderVersions {
    /// Find the entry for one version, if the registry lists it.
    pub fn find(&self, version: &str) -> Option<&ProviderVersionItem> {
        self.versions.iter().find(|item| item.version == version)
    }
}

// Registry response for "Find a Provider Package".

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderPackage {
    #[serde(default)]
    pub protocols: Vec<String>,
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub download_url: Url,
    pub shasums_url: Option<Url>,
    pub shasums_signature_url: Option<Url>,
    pub shasum: String,
    #[serde(default)]
    pub signing_keys: SigningKeys,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SigningKeys {
    #[serde(default)]
    pub gpg_public_keys: Vec<GpgPublicKey>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpgPublicKey {
    pub key_id: String,
    pub ascii_armor: String,
}

/// Cached metadata for one provider release: the per-platform package
/// documents assembled into a single entry.
///
/// Keys are `<os>_<arch>` as the mirror protocol spells platform pairs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub platforms: BTreeMap<String, PlatformPackage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlatformPackage {
    pub filename: String,
    pub download_url: Url,
    pub shasum: String,
    #[serde(default)]
    pub signing_keys: SigningKeys,
}

impl VersionMetadata {
    /// Digests of every archive this entry references.
    ///
    /// Platforms whose shasum is not a well-formed SHA-256 are skipped;
    /// those archives simply cannot be mirrored.
    pub fn digests(&self) -> Vec<ArtifactDigest> {
        self.platforms
            .values()
            .filter_map(|p| ArtifactDigest::from_hex(&p.shasum).ok())
            .collect()
    }
}

/// Mirror protocol platform key, `<os>_<arch>`.
pub fn platform_key(os: &str, arch: &str) -> String {
    let mut s = String::with_capacity(os.len() + 1 + arch.len());
    s.push_str(os);
    s.push('_');
    s.push_str(arch);
    s
}

// Mirror protocol responses served to terraform clients.

/// Index document: `{"versions": {"5.0.0": {}}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorIndex {
    pub versions: BTreeMap<String, EmptyObject>,
}

/// The nested value in a mirror index is always an empty object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EmptyObject {}

impl From<&ProviderVersions> for MirrorIndex {
    fn from(doc: &ProviderVersions) -> MirrorIndex {
        let versions = doc
            .versions
            .iter()
            .map(|item| (item.version.clone(), EmptyObject::default()))
            .collect();
        MirrorIndex { versions }
    }
}

/// Version document: `{"archives": {"linux_amd64": {"url": ..., "hashes": [..]}}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorVersion {
    pub archives: BTreeMap<String, MirrorArchive>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MirrorArchive {
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<String>,
}

impl MirrorVersion {
    /// Build the client-facing version document, rewriting every archive URL
    /// to this mirror's artifact route under `redirect_base`.
    ///
    /// The `zh:` hash scheme is the SHA-256 of the zip archive, which is
    /// exactly the content address the artifact route serves.
    pub fn build(metadata: &VersionMetadata, redirect_base: &Url) -> MirrorVersion {
        let archives = metadata
            .platforms
            .iter()
            .map(|(platform, package)| {
                let url = format!("{redirect_base}artifacts/{}", package.shasum);
                let archive = MirrorArchive {
                    url,
                    hashes: vec![format!("zh:{}", package.shasum)],
                };
                (platform.clone(), archive)
            })
            .collect();
        MirrorVersion { archives }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_versions() -> ProviderVersions {
        serde_json::from_value(serde_json::json!({
            "versions": [
                {
                    "version": "5.0.0",
                    "protocols": ["6.0"],
                    "platforms": [
                        {"os": "linux", "arch": "amd64"},
                        {"os": "darwin", "arch": "arm64"}
                    ]
                },
                {
                    "version": "4.67.0",
                    "protocols": ["5.0", "6.0"],
                    "platforms": [{"os": "linux", "arch": "amd64"}]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn deserializes_registry_versions_document() {
        let doc = sample_versions();
        assert_eq!(doc.versions.len(), 2);
        assert_eq!(doc.versions[0].platforms[1].arch, "arm64");
        assert!(doc.find("4.67.0").is_some());
        assert!(doc.find("0.0.1").is_none());
    }

    #[test]
    fn mirror_index_field_names() {
        let index = MirrorIndex::from(&sample_versions());
        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json["versions"]["5.0.0"], serde_json::json!({}));
        assert_eq!(json["versions"]["4.67.0"], serde_json::json!({}));
    }

    #[test]
    fn mirror_version_rewrites_urls() {
        let digest = ArtifactDigest::compute(b"zipbytes").to_hex();
        let metadata = VersionMetadata {
            platforms: BTreeMap::from([(
                platform_key("linux", "amd64"),
                PlatformPackage {
                    filename: "terraform-provider-aws_5.0.0_linux_amd64.zip".to_string(),
                    download_url: "https://releases.example.com/p.zip".parse().unwrap(),
                    shasum: digest.clone(),
                    signing_keys: SigningKeys::default(),
                },
            )]),
        };
        let base: Url = "https://mirror.internal/".parse().unwrap();
        let doc = MirrorVersion::build(&metadata, &base);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            json["archives"]["linux_amd64"]["url"],
            format!("https://mirror.internal/artifacts/{digest}")
        );
        assert_eq!(
            json["archives"]["linux_amd64"]["hashes"][0],
            format!("zh:{digest}")
        );
    }

    #[test]
    fn package_document_field_names() {
        let package: ProviderPackage = serde_json::from_value(serde_json::json!({
            "protocols": ["6.0"],
            "os": "linux",
            "arch": "amd64",
            "filename": "terraform-provider-aws_5.0.0_linux_amd64.zip",
            "download_url": "https://releases.example.com/p.zip",
            "shasums_url": "https://releases.example.com/SHA256SUMS",
            "shasums_signature_url": "https://releases.example.com/SHA256SUMS.sig",
            "shasum": "95a342c3f5f29edd3991af1d3e6a5c7918ba21bc9427be3a0d98dcbb4f2f2d62",
            "signing_keys": {
                "gpg_public_keys": [{"key_id": "51852D87348FFC4C", "ascii_armor": "-----BEGIN..."}]
            }
        }))
        .unwrap();
        assert_eq!(package.filename, "terraform-provider-aws_5.0.0_linux_amd64.zip");
        assert_eq!(package.signing_keys.gpg_public_keys[0].key_id, "51852D87348FFC4C");
    }
}
