//! Root token and recovery keys written when a secret store is initialized.  They live under
//! `<vault-dir>/private/<host>/`, readable only by the operator.

use super::{error, InitKeys, Result};
use log::{debug, warn};
use snafu::{ensure, ResultExt};
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

const TOKEN_FILE: &str = "vault_token";
const KEY_PREFIX: &str = "vault_key.";

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Persisted material for one secret store host
#[derive(Debug, Clone)]
pub(crate) struct PrivateStore {
    dir: PathBuf,
}

impl PrivateStore {
    pub(crate) fn new<P: AsRef<Path>>(vault_dir: P, host: &str) -> Self {
        Self {
            dir: vault_dir.as_ref().join("private").join(host),
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// True when a root token has been saved for this host
    pub(crate) fn exists(&self) -> bool {
        self.dir.join(TOKEN_FILE).is_file()
    }

    pub(crate) fn save(&self, keys: &InitKeys) -> Result<()> {
        ensure!(
            !self.exists(),
            error::PrivateExistsSnafu { path: &self.dir }
        );
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(&self.dir)
            .context(error::PrivateDirSnafu { path: &self.dir })?;
        // An existing directory keeps its mode, so tighten it explicitly.
        fs::set_permissions(&self.dir, fs::Permissions::from_mode(DIR_MODE))
            .context(error::PrivateDirSnafu { path: &self.dir })?;

        self.write(TOKEN_FILE, &keys.root_token)?;
        for (index, key) in keys.recovery_keys.iter().enumerate() {
            self.write(&format!("{}{}", KEY_PREFIX, index + 1), key)?;
        }

        warn!("========================================================");
        warn!("Secret store root token and recovery keys were saved in");
        warn!("    {}", self.dir.display());
        warn!("Move them somewhere safe; they can't be recovered.");
        warn!("========================================================");
        Ok(())
    }

    fn write(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.dir.join(name);
        debug!("Writing {}", path.display());
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(FILE_MODE)
            .open(&path)
            .context(error::PrivateFileSnafu { path: &path })?;
        file.write_all(contents.as_bytes())
            .context(error::PrivateFileSnafu { path: &path })
    }

    pub(crate) fn root_token(&self) -> Result<String> {
        let path = self.dir.join(TOKEN_FILE);
        let token =
            fs::read_to_string(&path).context(error::PrivateFileSnafu { path: &path })?;
        Ok(token.trim().to_string())
    }

    /// Recovery keys in the order they were issued
    pub(crate) fn keys(&self) -> Result<Vec<String>> {
        let mut numbered = Vec::new();
        let entries =
            fs::read_dir(&self.dir).context(error::PrivateDirSnafu { path: &self.dir })?;
        for entry in entries {
            let entry = entry.context(error::PrivateDirSnafu { path: &self.dir })?;
            let file_name = entry.file_name();
            let index = match file_name
                .to_str()
                .and_then(|name| name.strip_prefix(KEY_PREFIX))
                .and_then(|index| index.parse::<u32>().ok())
            {
                Some(index) => index,
                None => continue,
            };
            let path = entry.path();
            let key =
                fs::read_to_string(&path).context(error::PrivateFileSnafu { path: &path })?;
            numbered.push((index, key.trim().to_string()));
        }
        numbered.sort();
        Ok(numbered.into_iter().map(|(_, key)| key).collect())
    }
}
