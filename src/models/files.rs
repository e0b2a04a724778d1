//! Reference model file resolution
//!
//! A model id is either a local directory laid out like a HuggingFace
//! snapshot or a Hub repository id. Both resolve to the same set of paths:
//! `config.json`, `tokenizer.json` and one or more safetensors files.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Paths of everything needed to build the reference model
#[derive(Debug, Clone)]
pub struct ModelFiles {
    /// Model id the files were resolved from
    pub model_id: String,
    /// `config.json`
    pub config: PathBuf,
    /// `tokenizer.json`
    pub tokenizer: PathBuf,
    /// Safetensors weights, sorted; more than one when sharded
    pub weights: Vec<PathBuf>,
}

/// Something that can hand out a model file by name
trait FileSource {
    /// Whether the source has a file called `name`
    fn contains(&self, name: &str) -> Result<bool>;

    /// Path of `name`, or an error if the source does not have it
    fn get(&self, name: &str) -> Result<PathBuf>;
}

/// Snapshot directory on local disk
struct LocalDir(PathBuf);

impl FileSource for LocalDir {
    fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.0.join(name).is_file())
    }

    fn get(&self, name: &str) -> Result<PathBuf> {
        let path = self.0.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            anyhow::bail!("{} not found in {:?}", name, self.0)
        }
    }
}

/// Repository on the HuggingFace Hub (downloaded into the local cache)
struct HubRepo {
    repo: hf_hub::api::sync::ApiRepo,
    files: BTreeSet<String>,
}

impl HubRepo {
    /// List the repository once; network, auth and revision errors surface here
    fn open(repo: hf_hub::api::sync::ApiRepo) -> Result<Self> {
        let info = repo
            .info()
            .context("Failed to list repository files on the HuggingFace Hub")?;
        let files = info.siblings.into_iter().map(|s| s.rfilename).collect();
        Ok(Self { repo, files })
    }
}

impl FileSource for HubRepo {
    fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.files.contains(name))
    }

    fn get(&self, name: &str) -> Result<PathBuf> {
        self.repo
            .get(name)
            .with_context(|| format!("Failed to fetch {}", name))
    }
}

impl ModelFiles {
    /// Resolve the files of `model_id`.
    ///
    /// An existing directory is used as-is; anything else is treated as a
    /// Hub repository id and fetched at `revision` (default branch if `None`).
    pub fn resolve(model_id: &str, revision: Option<&str>) -> Result<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            debug!("Resolving model files from local directory {:?}", local);
            return Self::from_source(model_id, &LocalDir(local.to_path_buf()));
        }

        use hf_hub::{api::sync::Api, Repo, RepoType};

        info!("Fetching model '{}' from the HuggingFace Hub", model_id);
        let api = Api::new().context("Failed to initialize HuggingFace API")?;
        let repo = match revision {
            Some(rev) => Repo::with_revision(model_id.to_string(), RepoType::Model, rev.to_string()),
            None => Repo::new(model_id.to_string(), RepoType::Model),
        };

        Self::from_source(model_id, &HubRepo::open(api.repo(repo))?)
    }

    /// Resolve the files of a local snapshot directory
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        Self::from_source(&dir.display().to_string(), &LocalDir(dir.to_path_buf()))
    }

    fn from_source(model_id: &str, source: &dyn FileSource) -> Result<Self> {
        let config = source
            .get(CONFIG_FILE)
            .with_context(|| format!("Config not found for {}", model_id))?;
        let tokenizer = source
            .get(TOKENIZER_FILE)
            .with_context(|| format!("Tokenizer not found for {}", model_id))?;
        let weights = weight_files(source)
            .with_context(|| format!("Weights not found for {}", model_id))?;

        debug!("Resolved {} weight file(s) for {}", weights.len(), model_id);

        Ok(Self {
            model_id: model_id.to_string(),
            config,
            tokenizer,
            weights,
        })
    }

    /// Total size of the weight files in bytes
    pub fn weights_size(&self) -> u64 {
        self.weights
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }
}

/// Single `model.safetensors`, else the shards named by the index file.
/// Only a file that is absent triggers the fallback; any other failure is returned.
fn weight_files(source: &dyn FileSource) -> Result<Vec<PathBuf>> {
    if source.contains(SINGLE_WEIGHTS_FILE)? {
        return Ok(vec![source.get(SINGLE_WEIGHTS_FILE)?]);
    }
    if !source.contains(WEIGHTS_INDEX_FILE)? {
        anyhow::bail!(
            "neither {} nor {} is present",
            SINGLE_WEIGHTS_FILE,
            WEIGHTS_INDEX_FILE
        );
    }

    let index_path = source.get(WEIGHTS_INDEX_FILE)?;
    let index_str = std::fs::read_to_string(&index_path)
        .with_context(|| format!("Failed to read safetensors index: {:?}", index_path))?;
    let shards = shard_names(&index_str)?;

    let mut files = Vec::with_capacity(shards.len());
    for shard in &shards {
        files.push(source.get(shard)?);
    }
    files.sort();
    Ok(files)
}

/// Distinct shard file names listed in a safetensors index
fn shard_names(index_json: &str) -> Result<BTreeSet<String>> {
    let index: serde_json::Value = serde_json::from_str(index_json)?;
    let weight_map = index
        .get("weight_map")
        .and_then(|w| w.as_object())
        .ok_or_else(|| anyhow::anyhow!("safetensors index has no weight_map"))?;

    let shards: BTreeSet<String> = weight_map
        .values()
        .filter_map(|f| f.as_str().map(str::to_string))
        .collect();

    if shards.is_empty() {
        anyhow::bail!("safetensors index lists no shards");
    }
    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_shard_names_deduplicated() {
        let index = r#"{
            "metadata": {"total_size": 10},
            "weight_map": {
                "a.weight": "model-00002-of-00002.safetensors",
                "b.weight": "model-00001-of-00002.safetensors",
                "c.weight": "model-00001-of-00002.safetensors"
            }
        }"#;
        let shards: Vec<String> = shard_names(index).unwrap().into_iter().collect();
        assert_eq!(
            shards,
            vec![
                "model-00001-of-00002.safetensors".to_string(),
                "model-00002-of-00002.safetensors".to_string()
            ]
        );
    }

    #[test]
    fn test_shard_names_requires_weight_map() {
        assert!(shard_names(r#"{"metadata": {}}"#).is_err());
        assert!(shard_names(r#"{"weight_map": {}}"#).is_err());
    }

    #[test]
    fn test_local_single_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), CONFIG_FILE, "{}");
        touch(dir.path(), TOKENIZER_FILE, "{}");
        touch(dir.path(), SINGLE_WEIGHTS_FILE, "");

        let files = ModelFiles::from_dir(dir.path()).unwrap();
        assert_eq!(files.weights, vec![dir.path().join(SINGLE_WEIGHTS_FILE)]);
        assert_eq!(files.config, dir.path().join(CONFIG_FILE));
    }

    #[test]
    fn test_local_sharded() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), CONFIG_FILE, "{}");
        touch(dir.path(), TOKENIZER_FILE, "{}");
        touch(
            dir.path(),
            WEIGHTS_INDEX_FILE,
            r#"{"weight_map": {"x": "b.safetensors", "y": "a.safetensors"}}"#,
        );
        touch(dir.path(), "a.safetensors", "");
        touch(dir.path(), "b.safetensors", "");

        let files = ModelFiles::resolve(dir.path().to_str().unwrap(), None).unwrap();
        assert_eq!(
            files.weights,
            vec![dir.path().join("a.safetensors"), dir.path().join("b.safetensors")]
        );
    }

    #[test]
    fn test_local_missing_shard() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), CONFIG_FILE, "{}");
        touch(dir.path(), TOKENIZER_FILE, "{}");
        touch(
            dir.path(),
            WEIGHTS_INDEX_FILE,
            r#"{"weight_map": {"x": "missing.safetensors"}}"#,
        );

        assert!(ModelFiles::from_dir(dir.path()).is_err());
    }

    /// Source whose listing works but whose downloads fail
    struct UnreachableSource;

    impl FileSource for UnreachableSource {
        fn contains(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }

        fn get(&self, name: &str) -> Result<PathBuf> {
            anyhow::bail!("connection reset while fetching {}", name)
        }
    }

    /// Source that cannot even be listed
    struct UnlistableSource;

    impl FileSource for UnlistableSource {
        fn contains(&self, _name: &str) -> Result<bool> {
            anyhow::bail!("401 Unauthorized")
        }

        fn get(&self, _name: &str) -> Result<PathBuf> {
            anyhow::bail!("401 Unauthorized")
        }
    }

    #[test]
    fn test_weight_fetch_error_is_not_masked() {
        let err = weight_files(&UnreachableSource).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("connection reset while fetching model.safetensors"));
        assert!(!msg.contains("neither"));
    }

    #[test]
    fn test_weight_listing_error_is_not_masked() {
        let err = weight_files(&UnlistableSource).unwrap_err();
        assert!(format!("{:#}", err).contains("401 Unauthorized"));
    }

    #[test]
    fn test_local_no_weights() {
        let dir = tempfile::tempdir().unwrap();
        let err = weight_files(&LocalDir(dir.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("neither"));
    }

    #[test]
    fn test_local_missing_tokenizer() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), CONFIG_FILE, "{}");
        touch(dir.path(), SINGLE_WEIGHTS_FILE, "");

        let err = ModelFiles::from_dir(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Tokenizer not found"));
    }
}
