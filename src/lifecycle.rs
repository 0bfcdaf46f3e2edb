use crate::service::CommandService;
use clap::ValueEnum;
use tracing::info;

/// Triggers the host delivers around the service's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LifecycleHook {
    Start,
    Unload,
    Uninstall,
    Migrate,
}

/// Runs `hook` against `service`. None of the hooks change stored records.
pub fn handle(service: &CommandService, hook: LifecycleHook) {
    match hook {
        LifecycleHook::Start => {
            info!("exekawaii starting");
            let count = service.with_registry(|registry| registry.reload());
            info!(count, "loaded commands");
        }
        LifecycleHook::Unload => info!("exekawaii unloading"),
        LifecycleHook::Uninstall => info!("exekawaii uninstalling"),
        LifecycleHook::Migrate => {
            info!("exekawaii migration check");
            let dir = service.with_registry(|registry| registry.commands_dir());
            info!(path = %dir.display(), "commands directory ready");
        }
    }
}
