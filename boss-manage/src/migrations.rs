//! Version-spanning migrations for configuration modules.
//!
//! Each module may have a directory `<migrations>/<module>/` holding hook files named
//! `NNNNMMMM_name.toml`, where `NNNN` is the stack version the migration starts from and `MMMM`
//! the version it ends at.  A hook file may define `pre_update` and `post_update` shell commands;
//! the pre-update hooks run before the stack update is submitted and the post-update hooks after
//! the stack reaches `UPDATE_COMPLETE`.
//!
//! While a migration is underway, `<migrations>/<module>/progress` holds the version the stack
//! has been migrated to so far.  Its presence means an earlier update didn't finish, and
//! `update-migrate` picks up from there.

use bosslet_config::Bosslet;
use lazy_static::lazy_static;
use log::{debug, error, info, trace};
use regex::Regex;
use serde::Deserialize;
use snafu::{ensure, OptionExt, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Name of the file recording how far an interrupted migration got
pub(crate) const PROGRESS_FILE: &str = "progress";

lazy_static! {
    /// Matches migration file names, capturing the start and stop versions and the name.
    static ref MIGRATION_FILENAME_RE: Regex = Regex::new(
        r"(?x)^
          (?P<start>[0-9]{4})
          (?P<stop>[0-9]{4})
          _
          (?P<name>[a-zA-Z0-9_-]+)
          \.toml$"
    )
    .unwrap();
}

/// The hooks a migration file may define
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
struct Hooks {
    pre_update: Option<String>,
    post_update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Migration {
    pub(crate) start: u32,
    pub(crate) stop: u32,
    pub(crate) name: String,
    path: PathBuf,
    hooks: Hooks,
}

impl Migration {
    fn load(path: &Path, start: u32, stop: u32, name: &str) -> Result<Self> {
        let hooks_str = fs::read_to_string(path).context(error::FileSnafu { path })?;
        let hooks = toml::from_str(&hooks_str).context(error::InvalidHooksSnafu { path })?;
        Ok(Self {
            start,
            stop,
            name: name.to_string(),
            path: path.to_path_buf(),
            hooks,
        })
    }
}

/// Which hook of a migration is being run
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Hook {
    PreUpdate,
    PostUpdate,
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hook::PreUpdate => write!(f, "pre_update"),
            Hook::PostUpdate => write!(f, "post_update"),
        }
    }
}

/// The chain of migrations that moves one module from one stack version to another
#[derive(Debug)]
pub(crate) struct Migrations {
    module: String,
    dir: PathBuf,
    from: u32,
    to: u32,
    chain: Vec<Migration>,
}

impl Migrations {
    /// Finds the migrations of `module` that move it from version `from` to version `to`.  The
    /// migrations must form a single unbroken chain between the two versions.
    pub(crate) fn load<P>(root: P, module: &str, from: u32, to: u32) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let dir = root.as_ref().join(module);
        let mut migrations = Self {
            module: module.to_string(),
            dir,
            from,
            to,
            chain: Vec::new(),
        };
        if from == to {
            trace!("{} is already at version {}, no migrations needed", module, to);
            return Ok(migrations);
        }

        let candidates = if migrations.dir.is_dir() {
            find_migrations_on_disk(&migrations.dir)?
        } else {
            Vec::new()
        };
        migrations.chain = select_migrations(module, from, to, candidates)?;
        Ok(migrations)
    }

    pub(crate) fn chain(&self) -> &[Migration] {
        &self.chain
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    fn progress_path(&self) -> PathBuf {
        self.dir.join(PROGRESS_FILE)
    }

    /// Records the starting version and runs every pre-update hook, oldest first
    pub(crate) fn pre_update(&self, bosslet: &Bosslet) -> Result<()> {
        if self.chain.is_empty() {
            return Ok(());
        }
        write_progress(&self.dir, self.from)?;
        for migration in &self.chain {
            self.run_hook(migration, Hook::PreUpdate, bosslet)?;
        }
        Ok(())
    }

    /// Runs every post-update hook, recording the progress after each, and removes the progress
    /// file once the whole chain is done.
    pub(crate) fn post_update(&self, bosslet: &Bosslet) -> Result<()> {
        for migration in &self.chain {
            self.run_hook(migration, Hook::PostUpdate, bosslet)?;
            write_progress(&self.dir, migration.stop)?;
        }
        let progress = self.progress_path();
        if !progress.exists() {
            return Ok(());
        }
        fs::remove_file(&progress).context(error::RemoveProgressSnafu { path: &progress })?;
        info!(
            "Migrated {} from version {} to {}",
            self.module, self.from, self.to
        );
        Ok(())
    }

    fn run_hook(&self, migration: &Migration, hook: Hook, bosslet: &Bosslet) -> Result<()> {
        let command_line = match hook {
            Hook::PreUpdate => migration.hooks.pre_update.as_deref(),
            Hook::PostUpdate => migration.hooks.post_update.as_deref(),
        };
        let command_line = match command_line {
            Some(command_line) => command_line,
            None => {
                trace!("{} has no {} hook", migration.path.display(), hook);
                return Ok(());
            }
        };

        let words =
            shell_words::split(command_line).context(error::CommandSplitSnafu { command_line })?;
        let (program, args) = words
            .split_first()
            .context(error::EmptyCommandSnafu {
                path: &migration.path,
                hook: hook.to_string(),
            })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.dir)
            .env("BOSSLET", &bosslet.name)
            .env("REGION", &bosslet.region)
            .env("MODULE", &self.module)
            .env("FROM_VERSION", migration.start.to_string())
            .env("TO_VERSION", migration.stop.to_string());
        info!(
            "Running {} hook of migration {} ({} -> {}): {}",
            hook, migration.name, migration.start, migration.stop, command_line
        );
        let output = command
            .output()
            .context(error::StartHookSnafu { command_line })?;

        if !output.stdout.is_empty() {
            debug!("Migration stdout: {}", String::from_utf8_lossy(&output.stdout));
        }
        if !output.stderr.is_empty() {
            // Hook errors should be visible on the console
            error!("Migration stderr: {}", String::from_utf8_lossy(&output.stderr));
        }
        ensure!(
            output.status.success(),
            error::HookFailedSnafu {
                migration: &migration.name,
                hook: hook.to_string(),
                code: output.status.code(),
            }
        );
        Ok(())
    }
}

/// The version recorded by an interrupted migration of `module`, if there is one
pub(crate) fn read_progress<P>(root: P, module: &str) -> Result<Option<u32>>
where
    P: AsRef<Path>,
{
    let path = root.as_ref().join(module).join(PROGRESS_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path).context(error::FileSnafu { path: &path })?;
    contents
        .trim()
        .parse()
        .map(Some)
        .context(error::InvalidProgressSnafu {
            path: &path,
            contents: contents.trim(),
        })
}

fn write_progress(dir: &Path, version: u32) -> Result<()> {
    fs::create_dir_all(dir).context(error::WriteProgressSnafu { path: dir })?;
    let path = dir.join(PROGRESS_FILE);
    trace!("Recording migration progress {} in {}", version, path.display());
    fs::write(&path, version.to_string()).context(error::WriteProgressSnafu { path: &path })
}

fn find_migrations_on_disk(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut result = Vec::new();
    trace!("Looking for potential migrations in {}", dir.display());
    let entries = fs::read_dir(dir).context(error::ListMigrationsSnafu { dir })?;
    for entry in entries {
        let entry = entry.context(error::ListMigrationsSnafu { dir })?;
        let path = entry.path();
        if !path.is_file() {
            debug!("Skipping non-file in migration directory: {}", path.display());
            continue;
        }
        result.push(path);
    }
    Ok(result)
}

/// Picks the migrations inside `[from, to]` and checks that they chain from `from` to `to`.
fn select_migrations(
    module: &str,
    from: u32,
    to: u32,
    paths: Vec<PathBuf>,
) -> Result<Vec<Migration>> {
    let mut sortable = Vec::new();
    for path in paths {
        let file_name = match path.file_name().and_then(|name| name.to_str()) {
            Some(file_name) => file_name,
            None => continue,
        };
        let captures = match MIGRATION_FILENAME_RE.captures(file_name) {
            Some(captures) => captures,
            None => {
                if file_name != PROGRESS_FILE {
                    debug!("Skipping non-migration (bad name): {}", path.display());
                }
                continue;
            }
        };
        // The pattern only matches four digits, which always parse
        let start: u32 = captures["start"].parse().unwrap_or_default();
        let stop: u32 = captures["stop"].parse().unwrap_or_default();
        if start >= from && stop <= to && start < stop {
            info!("Found applicable migration '{}': {} -> {}", file_name, start, stop);
            sortable.push(Migration::load(&path, start, stop, &captures["name"])?);
        } else {
            debug!(
                "Migration '{}' doesn't apply when going from {} to {}",
                file_name, from, to
            );
        }
    }
    sortable.sort_by(|a, b| (a.start, a.stop, &a.name).cmp(&(b.start, b.stop, &b.name)));

    let mut version = from;
    let mut chain = Vec::new();
    for migration in sortable {
        ensure!(
            migration.start == version,
            error::MissingStartSnafu { module, version }
        );
        version = migration.stop;
        chain.push(migration);
    }
    ensure!(version == to, error::MissingStopSnafu { module, version: to });
    Ok(chain)
}

mod error {
    use snafu::Snafu;
    use std::io;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Error splitting shell command '{}': {}", command_line, source))]
        CommandSplit {
            command_line: String,
            source: shell_words::ParseError,
        },

        #[snafu(display("Empty {} command in '{}'", hook, path.display()))]
        EmptyCommand { path: PathBuf, hook: String },

        #[snafu(display("Failed to read '{}': {}", path.display(), source))]
        File { path: PathBuf, source: io::Error },

        #[snafu(display(
            "The {} hook of migration {} failed with exit code {}",
            hook,
            migration,
            code.map(|c| c.to_string()).unwrap_or_else(|| "<signal>".to_string())
        ))]
        HookFailed {
            migration: String,
            hook: String,
            code: Option<i32>,
        },

        #[snafu(display("Invalid migration hooks in '{}': {}", path.display(), source))]
        InvalidHooks {
            path: PathBuf,
            source: toml::de::Error,
        },

        #[snafu(display("Invalid migration progress '{}' in '{}': {}", contents, path.display(), source))]
        InvalidProgress {
            path: PathBuf,
            contents: String,
            source: std::num::ParseIntError,
        },

        #[snafu(display("Failed to list migrations in '{}': {}", dir.display(), source))]
        ListMigrations { dir: PathBuf, source: io::Error },

        #[snafu(display("No migration of {} starts at version {}", module, version))]
        MissingStart { module: String, version: u32 },

        #[snafu(display("No migration of {} ends at version {}", module, version))]
        MissingStop { module: String, version: u32 },

        #[snafu(display("Failed to remove '{}': {}", path.display(), source))]
        RemoveProgress { path: PathBuf, source: io::Error },

        #[snafu(display("Failed to start migration command '{}': {}", command_line, source))]
        StartHook {
            command_line: String,
            source: io::Error,
        },

        #[snafu(display("Failed to record migration progress in '{}': {}", path.display(), source))]
        WriteProgress { path: PathBuf, source: io::Error },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::{read_progress, Error, Migrations, PROGRESS_FILE};
    use bosslet_config::{Bosslet, BossletProfile};
    use std::fs;
    use std::path::Path;

    fn bosslet() -> Bosslet {
        let profile: BossletProfile = toml::from_str(
            r#"
region = "us-east-1"
account_id = "123456789012"
internal_domain = "bosslet.a"
external_domain = "theboss.io"
vpc_cidr = "10.10.0.0/16"
ssh_key = "bosslet-a"
ami_suffix = ".boss"
"#,
        )
        .unwrap();
        profile.build("bosslet.a").unwrap()
    }

    fn write(root: &Path, module: &str, name: &str, contents: &str) {
        let dir = root.join(module);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn chain_in_order() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "api", "00010002_tables.toml", "");
        write(root.path(), "api", "00000001_initial.toml", "");
        write(root.path(), "api", "notes.txt", "not a migration");

        let migrations = Migrations::load(root.path(), "api", 0, 2).unwrap();
        let names: Vec<_> = migrations.chain().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["initial", "tables"]);
    }

    #[test]
    fn window_limits_chain() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "api", "00000001_initial.toml", "");
        write(root.path(), "api", "00010002_tables.toml", "");
        write(root.path(), "api", "00020003_queues.toml", "");

        let migrations = Migrations::load(root.path(), "api", 1, 2).unwrap();
        assert_eq!(migrations.chain().len(), 1);
        assert_eq!(migrations.chain()[0].name, "tables");
        assert!(Migrations::load(root.path(), "api", 3, 3).unwrap().is_empty());
    }

    #[test]
    fn missing_versions() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "api", "00000001_initial.toml", "");
        write(root.path(), "api", "00010002_tables.toml", "");

        assert!(matches!(
            Migrations::load(root.path(), "api", 0, 3),
            Err(Error::MissingStop { version: 3, .. })
        ));
        write(root.path(), "core", "00020003_queues.toml", "");
        assert!(matches!(
            Migrations::load(root.path(), "core", 1, 3),
            Err(Error::MissingStart { version: 1, .. })
        ));
        assert!(matches!(
            Migrations::load(root.path(), "redis", 1, 2),
            Err(Error::MissingStop { .. })
        ));
    }

    #[test]
    fn hooks_run_and_progress_is_recorded() {
        let root = tempfile::tempdir().unwrap();
        write(
            root.path(),
            "api",
            "00010002_tables.toml",
            "pre_update = \"sh -c 'echo $BOSSLET $FROM_VERSION > pre.out'\"\n\
             post_update = \"sh -c 'echo $TO_VERSION > post.out'\"\n",
        );
        let migrations = Migrations::load(root.path(), "api", 1, 2).unwrap();

        migrations.pre_update(&bosslet()).unwrap();
        let dir = root.path().join("api");
        assert_eq!(fs::read_to_string(dir.join("pre.out")).unwrap(), "bosslet.a 1\n");
        assert_eq!(read_progress(root.path(), "api").unwrap(), Some(1));

        migrations.post_update(&bosslet()).unwrap();
        assert_eq!(fs::read_to_string(dir.join("post.out")).unwrap(), "2\n");
        assert!(!dir.join(PROGRESS_FILE).exists());
    }

    #[test]
    fn failed_post_update_keeps_start_version() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "api", "00010002_tables.toml", "post_update = \"true\"\n");
        write(root.path(), "api", "00020003_queues.toml", "post_update = \"false\"\n");
        let migrations = Migrations::load(root.path(), "api", 1, 3).unwrap();

        migrations.pre_update(&bosslet()).unwrap();
        assert!(matches!(
            migrations.post_update(&bosslet()),
            Err(Error::HookFailed { ref migration, .. }) if migration == "queues"
        ));
        assert_eq!(read_progress(root.path(), "api").unwrap(), Some(2));
    }

    #[test]
    fn no_progress_without_file() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(read_progress(root.path(), "api").unwrap(), None);
    }
}
