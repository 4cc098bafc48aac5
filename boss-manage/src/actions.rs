//! Applies one action to the modules named on the command line: plans the order, then runs each
//! module's hooks, template and stack operation in turn.  The first failure stops the run and
//! leaves everything already applied in place.

use crate::configs::{self, Module};
use crate::context::Context;
use crate::migrations::{self, Migrations};
use crate::prompt::Prompt;
use crate::resolver::{self, Selected};
use crate::stack::driver::{self, LEGACY_VERSION};
use crate::stack::{StackDriver, StackService, StackStatus};
use bosslet_config::LogicalId;
use log::{debug, info};
use snafu::{ensure, IntoError, ResultExt};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::time::Duration;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    Create,
    Update,
    Delete,
    Generate,
    PreInit,
    PostInit,
    UpdateMigrate,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Generate => "generate",
            Action::PreInit => "pre-init",
            Action::PostInit => "post-init",
            Action::UpdateMigrate => "update-migrate",
        })
    }
}

pub(crate) struct Deployment<'a> {
    ctx: &'a Context,
    driver: StackDriver<'a>,
    prompt: &'a dyn Prompt,
}

impl<'a> Deployment<'a> {
    pub(crate) fn new(
        ctx: &'a Context,
        service: &'a dyn StackService,
        prompt: &'a dyn Prompt,
    ) -> Self {
        let driver = StackDriver::new(
            service,
            prompt,
            ctx.commit.as_str(),
            Duration::from_secs(ctx.scenario.stack_poll_seconds),
            !ctx.bosslet.disable_preview,
        );
        Self {
            ctx,
            driver,
            prompt,
        }
    }

    pub(crate) async fn run(&self, action: Action, names: &[String]) -> Result<()> {
        let modules = configs::select(names).context(error::ModulesSnafu)?;
        let deployed = match action {
            Action::Generate => HashMap::new(),
            _ => self.deployed().await?,
        };
        let planned = resolver::plan(
            action,
            &selected(&modules),
            &selected(&configs::catalog()),
            &deployed,
        )
        .context(error::PlanSnafu)?;
        if planned.is_empty() {
            info!("Nothing to {} for bosslet {}", action, self.ctx.bosslet.name);
            return Ok(());
        }

        let plan: Vec<&str> = planned.iter().map(|id| id.as_str()).collect();
        info!("Plan for {}: {}", action, plan.join(", "));
        if action == Action::Delete {
            let question = format!(
                "Delete the stacks of {} in bosslet {}?",
                plan.join(", "),
                self.ctx.bosslet.name
            );
            if !self.prompt.confirm(&question, false) {
                info!("Not deleting anything");
                return Ok(());
            }
        }

        for id in planned {
            // The plan only holds selected modules
            if let Some(module) = modules.iter().find(|module| module.id() == id) {
                self.apply(action, module.as_ref()).await?;
            }
        }
        Ok(())
    }

    /// Deployed stacks by the module they belong to.  Stacks that no module owns are ignored.
    async fn deployed(&self) -> Result<HashMap<LogicalId, StackStatus>> {
        let mut stacks = self.driver.status().await.context(error::StackSnafu)?;
        let mut deployed = HashMap::new();
        for module in configs::catalog() {
            if let Some(status) = stacks.remove(&self.ctx.names.stack(module.id())) {
                debug!("Module {} is deployed: {}", module.id(), status);
                deployed.insert(module.id(), status);
            }
        }
        Ok(deployed)
    }

    async fn apply(&self, action: Action, module: &dyn Module) -> Result<()> {
        let id = module.id();
        let stack = self.ctx.names.stack(id);
        info!("Running {} for {} ({})", action, id, stack);
        match action {
            Action::Create => {
                self.pre_init(module).await?;
                let template = self.template(module).await?;
                self.driver
                    .create(&stack, &template, module.version())
                    .await
                    .map_err(|source| match source {
                        driver::Error::StackFailed { ref status, .. }
                            if status.as_str() == "ROLLBACK_COMPLETE" =>
                        {
                            error::RolledBackSnafu { module: id }.into_error(source)
                        }
                        source => error::StackSnafu.into_error(source),
                    })?;
                self.log_outputs(&stack).await?;
                self.post_init(module).await
            }
            Action::Update => self.update(module, &stack).await,
            Action::Delete => self.driver.delete(&stack).await.context(error::StackSnafu),
            Action::Generate => self.generate(module, &stack).await,
            Action::PreInit => self.pre_init(module).await,
            Action::PostInit => self.post_init(module).await,
            Action::UpdateMigrate => self.update_migrate(module, &stack).await,
        }
    }

    async fn update(&self, module: &dyn Module, stack: &str) -> Result<()> {
        let id = module.id();
        let root = self.ctx.paths.migrations();
        let progress = migrations::read_progress(&root, id.as_str())
            .context(error::MigrationSnafu { module: id })?;
        if let Some(version) = progress {
            return error::MigrationInProgressSnafu {
                bosslet: &self.ctx.bosslet.name,
                module: id,
                version,
            }
            .fail();
        }

        let current = self
            .driver
            .existing_version(stack)
            .await
            .context(error::StackSnafu)?
            .unwrap_or(LEGACY_VERSION);
        let version = module.version();
        ensure!(
            current <= version,
            error::DowngradeSnafu {
                module: id,
                current,
                version,
            }
        );

        self.pre_init(module).await?;
        let template = self.template(module).await?;
        let migrations = Migrations::load(&root, id.as_str(), current, version)
            .context(error::MigrationSnafu { module: id })?;
        migrations
            .pre_update(&self.ctx.bosslet)
            .context(error::MigrationSnafu { module: id })?;
        if self
            .driver
            .update(stack, &template, version)
            .await
            .context(error::StackSnafu)?
        {
            self.log_outputs(stack).await?;
        }
        migrations
            .post_update(&self.ctx.bosslet)
            .context(error::MigrationSnafu { module: id })?;
        self.post_init(module).await
    }

    /// Finishes the post-update hooks of an interrupted migration.  A stack still below the
    /// module's version is updated first, since its post-update hooks expect the new stack.
    async fn update_migrate(&self, module: &dyn Module, stack: &str) -> Result<()> {
        let id = module.id();
        let root = self.ctx.paths.migrations();
        let from = match migrations::read_progress(&root, id.as_str())
            .context(error::MigrationSnafu { module: id })?
        {
            Some(from) => from,
            None => {
                info!("No migration of {} in progress", id);
                return Ok(());
            }
        };

        let current = self
            .driver
            .existing_version(stack)
            .await
            .context(error::StackSnafu)?
            .unwrap_or(LEGACY_VERSION);
        let version = module.version();
        ensure!(
            current <= version,
            error::DowngradeSnafu {
                module: id,
                current,
                version,
            }
        );
        let migrations = Migrations::load(&root, id.as_str(), from, version)
            .context(error::MigrationSnafu { module: id })?;

        if current < version {
            info!(
                "Stack {} is still at version {}, updating it to {} before the post-update hooks",
                stack, current, version
            );
            self.pre_init(module).await?;
            let template = self.template(module).await?;
            if self
                .driver
                .update(stack, &template, version)
                .await
                .context(error::StackSnafu)?
            {
                self.log_outputs(stack).await?;
            }
        }
        migrations
            .post_update(&self.ctx.bosslet)
            .context(error::MigrationSnafu { module: id })?;
        self.post_init(module).await
    }

    async fn generate(&self, module: &dyn Module, stack: &str) -> Result<()> {
        let template = self.template(module).await?;
        let dir = self.ctx.paths.templates();
        fs::create_dir_all(&dir).context(error::CreateDirSnafu { path: &dir })?;

        let path = dir.join(format!("{}.template", stack));
        let body = template
            .to_string_pretty()
            .context(error::RenderSnafu { module: module.id() })?;
        fs::write(&path, body).context(error::WriteFileSnafu { path: &path })?;

        let path = dir.join(format!("{}.arguments", stack));
        let arguments = serde_json::to_string_pretty(&template.arguments_json())
            .context(error::SerializeSnafu { path: &path })?;
        fs::write(&path, arguments).context(error::WriteFileSnafu { path: &path })?;
        info!("Wrote template for {} to {}", stack, dir.display());
        for (bucket, key) in template.built_artifacts() {
            info!("{} expects function code at s3://{}/{}", stack, bucket, key);
        }
        Ok(())
    }

    async fn template(&self, module: &dyn Module) -> Result<cfn_template::Template> {
        module
            .template(self.ctx)
            .await
            .context(error::ConfigureSnafu { module: module.id() })
    }

    async fn pre_init(&self, module: &dyn Module) -> Result<()> {
        module.pre_init(self.ctx).await.context(error::PreInitSnafu {
            bosslet: &self.ctx.bosslet.name,
            module: module.id(),
        })
    }

    async fn post_init(&self, module: &dyn Module) -> Result<()> {
        module.post_init(self.ctx).await.context(error::PostInitSnafu {
            bosslet: &self.ctx.bosslet.name,
            module: module.id(),
        })
    }

    async fn log_outputs(&self, stack: &str) -> Result<()> {
        let outputs = self.driver.outputs(stack).await.context(error::StackSnafu)?;
        for (key, value) in outputs {
            debug!("{} output {} = {}", stack, key, value);
        }
        Ok(())
    }
}

fn selected(modules: &[Box<dyn Module>]) -> Vec<Selected> {
    modules
        .iter()
        .map(|module| Selected::new(module.id(), module.dependencies().to_vec()))
        .collect()
}

mod error {
    use bosslet_config::LogicalId;
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Failed to configure {}: {}", module, source))]
        Configure {
            module: LogicalId,
            source: crate::configs::Error,
        },

        #[snafu(display("Failed to create directory '{}': {}", path.display(), source))]
        CreateDir {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display(
            "Stack of {} is at version {}, newer than this checkout's {}",
            module,
            current,
            version
        ))]
        Downgrade {
            module: LogicalId,
            current: u32,
            version: u32,
        },

        #[snafu(display("Migration of {} failed: {}", module, source))]
        Migration {
            module: LogicalId,
            source: crate::migrations::Error,
        },

        #[snafu(display(
            "A migration of {} in bosslet {} stopped at version {}",
            module,
            bosslet,
            version
        ))]
        MigrationInProgress {
            bosslet: String,
            module: LogicalId,
            version: u32,
        },

        #[snafu(display("{}", source))]
        Modules { source: crate::configs::Error },

        #[snafu(display("{}", source))]
        Plan { source: crate::resolver::Error },

        #[snafu(display("Post-init of {} failed: {}", module, source))]
        PostInit {
            bosslet: String,
            module: LogicalId,
            source: crate::configs::Error,
        },

        #[snafu(display("Pre-init of {} failed: {}", module, source))]
        PreInit {
            bosslet: String,
            module: LogicalId,
            source: crate::configs::Error,
        },

        #[snafu(display("Failed to render template of {}: {}", module, source))]
        Render {
            module: LogicalId,
            source: cfn_template::Error,
        },

        #[snafu(display("Creating {} failed and was rolled back: {}", module, source))]
        RolledBack {
            module: LogicalId,
            source: crate::stack::driver::Error,
        },

        #[snafu(display("Failed to serialize '{}': {}", path.display(), source))]
        Serialize {
            path: PathBuf,
            source: serde_json::Error,
        },

        #[snafu(display("{}", source))]
        Stack { source: crate::stack::driver::Error },

        #[snafu(display("Failed to write '{}': {}", path.display(), source))]
        WriteFile {
            path: PathBuf,
            source: std::io::Error,
        },
    }
}
pub(crate) use error::Error;
pub(crate) type Result<T> = std::result::Result<T, error::Error>;

impl Error {
    /// 2 when the operator can finish the job with the remediation command, 1 otherwise
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Error::Migration { .. } | Error::MigrationInProgress { .. } => 2,
            Error::PreInit { source, .. } | Error::PostInit { source, .. } => {
                if is_operational(source) {
                    2
                } else {
                    1
                }
            }
            _ => 1,
        }
    }

    /// Lines printed under the message
    pub(crate) fn causes(&self) -> Vec<String> {
        match self {
            Error::Stack {
                source: driver::Error::StackFailed { causes, .. },
            }
            | Error::RolledBack {
                source: driver::Error::StackFailed { causes, .. },
                ..
            } => causes.clone(),
            _ => Vec::new(),
        }
    }

    /// The command that picks up where a failed run stopped
    pub(crate) fn remediation(&self, bosslet: &str) -> Option<String> {
        match self {
            Error::Migration { module, .. } | Error::MigrationInProgress { module, .. } => Some(
                format!("boss-manage {} {} {}", Action::UpdateMigrate, bosslet, module),
            ),
            Error::PreInit { module, .. } => Some(format!(
                "boss-manage {} {} {}",
                Action::PreInit,
                bosslet,
                module
            )),
            Error::PostInit { module, .. } => Some(format!(
                "boss-manage {} {} {}",
                Action::PostInit,
                bosslet,
                module
            )),
            // The rolled back stack is still there and has to go before creating it again
            Error::RolledBack { module, .. } => Some(format!(
                "boss-manage {delete} {bosslet} {module} && boss-manage {create} {bosslet} {module}",
                delete = Action::Delete,
                create = Action::Create,
                bosslet = bosslet,
                module = module,
            )),
            _ => None,
        }
    }
}

/// Failed health checks and logins clear up once the service settles
fn is_operational(error: &configs::Error) -> bool {
    matches!(
        error,
        configs::Error::Bootstrap {
            source: crate::bootstrap::Error::StatusCheck { .. }
                | crate::bootstrap::Error::Login { .. }
        }
    )
}

#[cfg(test)]
mod test {
    use super::{Action, Deployment, Error};
    use crate::context::test_support::context;
    use crate::context::{Context, Paths};
    use crate::migrations::PROGRESS_FILE;
    use crate::prompt::FixedAnswer;
    use crate::resolver;
    use crate::stack::driver;
    use crate::stack::memory::MemoryStacks;
    use crate::stack::ResourceChange;
    use std::fs;
    use std::path::Path;

    const CORE: &str = "CoreBossletA";
    const REDIS: &str = "RedisBossletA";

    fn modules(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn context_at(root: &Path) -> Context {
        let mut ctx = context();
        ctx.paths = Paths::new(root, root.join("config"));
        ctx
    }

    fn deployed() -> MemoryStacks {
        MemoryStacks::new()
            .with_stack(CORE, "CREATE_COMPLETE", &[("StackVersion", "1")])
            .with_stack(REDIS, "CREATE_COMPLETE", &[("StackVersion", "1")])
    }

    fn write_progress(root: &Path, module: &str, version: &str) {
        let dir = root.join("migrations").join(module);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(PROGRESS_FILE), version).unwrap();
    }

    /// A stack at version 0 with a migration to version 1 that stopped before its post-update
    /// hook, which leaves `marker` behind when it runs
    fn interrupted_migration(root: &Path, marker: &Path) -> MemoryStacks {
        write_progress(root, "redis", "0");
        fs::write(
            root.join("migrations")
                .join("redis")
                .join("00000001_session_cache.toml"),
            format!("post_update = \"touch {}\"\n", marker.display()),
        )
        .unwrap();
        let stacks = MemoryStacks::new()
            .with_stack(CORE, "CREATE_COMPLETE", &[("StackVersion", "1")])
            .with_stack(REDIS, "UPDATE_COMPLETE", &[("StackVersion", "0")]);
        stacks.plan_changes(
            REDIS,
            vec![ResourceChange {
                action: "Modify".into(),
                logical_id: "Cache".into(),
                physical_id: "redis-bosslet-a".into(),
                resource_type: "AWS::ElastiCache::ReplicationGroup".into(),
                replacement: "False".into(),
                scope: "Properties".into(),
            }],
        );
        stacks
    }

    #[test]
    fn actions_print_as_commands() {
        assert_eq!(Action::PostInit.to_string(), "post-init");
        assert_eq!(Action::UpdateMigrate.to_string(), "update-migrate");
    }

    #[tokio::test(start_paused = true)]
    async fn create_tags_new_stacks() {
        let ctx = context();
        let stacks = MemoryStacks::new().with_stack(CORE, "CREATE_COMPLETE", &[]);
        let answer = FixedAnswer(true);
        Deployment::new(&ctx, &stacks, &answer)
            .run(Action::Create, &modules(&["redis"]))
            .await
            .unwrap();

        let stack = stacks.stack(REDIS).unwrap();
        assert_eq!(stack.status.as_str(), "CREATE_COMPLETE");
        assert_eq!(stack.tags["StackVersion"], "1");
        assert_eq!(stack.tags["Commit"], "abc1234");
    }

    #[tokio::test(start_paused = true)]
    async fn create_skips_deployed_modules() {
        let ctx = context();
        let stacks = deployed();
        let answer = FixedAnswer(true);
        Deployment::new(&ctx, &stacks, &answer)
            .run(Action::Create, &modules(&["core", "redis"]))
            .await
            .unwrap();
        assert!(stacks.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn create_needs_dependencies() {
        let ctx = context();
        let stacks = MemoryStacks::new();
        let answer = FixedAnswer(true);
        let err = Deployment::new(&ctx, &stacks, &answer)
            .run(Action::Create, &modules(&["redis"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Plan {
                source: resolver::Error::MissingDependency { .. }
            }
        ));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_waits_for_confirmation() {
        let ctx = context();
        let stacks = deployed();
        let answer = FixedAnswer(false);
        Deployment::new(&ctx, &stacks, &answer)
            .run(Action::Delete, &modules(&["redis"]))
            .await
            .unwrap();
        assert!(stacks.calls().is_empty());
        assert!(stacks.stack(REDIS).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_goes_in_reverse() {
        let ctx = context();
        let stacks = deployed();
        let answer = FixedAnswer(true);
        Deployment::new(&ctx, &stacks, &answer)
            .run(Action::Delete, &modules(&["core", "redis"]))
            .await
            .unwrap();
        assert_eq!(
            stacks.calls(),
            vec![
                format!("delete_stack {}", REDIS),
                format!("delete_stack {}", CORE)
            ]
        );
        assert!(stacks.stack(CORE).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn generate_writes_template_and_arguments() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context_at(root.path());
        let stacks = MemoryStacks::new();
        let answer = FixedAnswer(true);
        Deployment::new(&ctx, &stacks, &answer)
            .run(Action::Generate, &modules(&["redis"]))
            .await
            .unwrap();

        let templates = root.path().join("templates");
        let body = fs::read_to_string(templates.join("RedisBossletA.template")).unwrap();
        let template: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(template["Resources"]["Cache"].is_object());
        assert!(templates.join("RedisBossletA.arguments").exists());
        assert!(stacks.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_without_changes_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context_at(root.path());
        let stacks = deployed();
        let answer = FixedAnswer(true);
        Deployment::new(&ctx, &stacks, &answer)
            .run(Action::Update, &modules(&["redis"]))
            .await
            .unwrap();
        assert!(!stacks
            .calls()
            .iter()
            .any(|call| call.starts_with("execute_change_set")));
    }

    #[tokio::test(start_paused = true)]
    async fn update_refuses_interrupted_migration() {
        let root = tempfile::tempdir().unwrap();
        write_progress(root.path(), "redis", "1");
        let ctx = context_at(root.path());
        let stacks = deployed();
        let answer = FixedAnswer(true);
        let err = Deployment::new(&ctx, &stacks, &answer)
            .run(Action::Update, &modules(&["redis"]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MigrationInProgress { version: 1, .. }));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(
            err.remediation("bosslet.a").as_deref(),
            Some("boss-manage update-migrate bosslet.a redis")
        );
        assert!(stacks.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_migrate_clears_progress() {
        let root = tempfile::tempdir().unwrap();
        write_progress(root.path(), "redis", "1");
        let ctx = context_at(root.path());
        let stacks = deployed();
        let answer = FixedAnswer(true);
        Deployment::new(&ctx, &stacks, &answer)
            .run(Action::UpdateMigrate, &modules(&["redis"]))
            .await
            .unwrap();
        assert!(!root
            .path()
            .join("migrations")
            .join("redis")
            .join(PROGRESS_FILE)
            .exists());
    }

    #[tokio::test(start_paused = true)]
    async fn update_migrate_updates_stacks_left_behind() {
        let root = tempfile::tempdir().unwrap();
        let marker = root.path().join("post-update-ran");
        let stacks = interrupted_migration(root.path(), &marker);
        let ctx = context_at(root.path());
        let answer = FixedAnswer(true);
        Deployment::new(&ctx, &stacks, &answer)
            .run(Action::UpdateMigrate, &modules(&["redis"]))
            .await
            .unwrap();

        assert!(stacks
            .calls()
            .iter()
            .any(|call| call.starts_with(&format!("execute_change_set {}", REDIS))));
        assert_eq!(stacks.stack(REDIS).unwrap().tags["StackVersion"], "1");
        assert!(marker.exists());
        assert!(!root
            .path()
            .join("migrations")
            .join("redis")
            .join(PROGRESS_FILE)
            .exists());
    }

    #[tokio::test(start_paused = true)]
    async fn update_migrate_keeps_progress_until_stack_is_updated() {
        let root = tempfile::tempdir().unwrap();
        let marker = root.path().join("post-update-ran");
        let stacks = interrupted_migration(root.path(), &marker);
        let ctx = context_at(root.path());
        let answer = FixedAnswer(false);
        let err = Deployment::new(&ctx, &stacks, &answer)
            .run(Action::UpdateMigrate, &modules(&["redis"]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Stack {
                source: driver::Error::Canceled { .. }
            }
        ));
        assert!(!marker.exists());
        assert_eq!(stacks.stack(REDIS).unwrap().tags["StackVersion"], "0");
        assert!(root
            .path()
            .join("migrations")
            .join("redis")
            .join(PROGRESS_FILE)
            .exists());
    }

    #[tokio::test(start_paused = true)]
    async fn rolled_back_create_points_at_delete() {
        let ctx = context();
        let stacks = MemoryStacks::new().with_stack(CORE, "CREATE_COMPLETE", &[]);
        stacks.fail_next(REDIS, "ROLLBACK_COMPLETE", &[("Cache", "Subnet group not found")]);
        let answer = FixedAnswer(true);
        let err = Deployment::new(&ctx, &stacks, &answer)
            .run(Action::Create, &modules(&["redis"]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RolledBack { .. }));
        assert_eq!(err.causes(), vec!["Cache: Subnet group not found".to_string()]);
        assert_eq!(
            err.remediation("bosslet.a").as_deref(),
            Some("boss-manage delete bosslet.a redis && boss-manage create bosslet.a redis")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn update_refuses_newer_stacks() {
        let ctx = context();
        let stacks = MemoryStacks::new()
            .with_stack(CORE, "CREATE_COMPLETE", &[])
            .with_stack(REDIS, "UPDATE_COMPLETE", &[("StackVersion", "7")]);
        let answer = FixedAnswer(true);
        let err = Deployment::new(&ctx, &stacks, &answer)
            .run(Action::Update, &modules(&["redis"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Downgrade { current: 7, .. }));
    }
}
