use crate::config::Config;
use crate::error::RegistryError;
use crate::executor::CommandExecutor;
use crate::registry::CommandRegistry;
use crate::storage::{
    CommandDefinition, CommandListResponse, ExecutionResult, InputValueSet, OperationResponse,
    SaveCommandResponse,
};
use crate::store_manager::StoreManager;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// The operations a front-end calls. None of them return `Err`: failures are
/// folded into the response values.
pub struct CommandService {
    registry: Mutex<CommandRegistry>,
    executor: CommandExecutor,
}

impl CommandService {
    pub fn new(registry: CommandRegistry, executor: CommandExecutor) -> Self {
        Self {
            registry: Mutex::new(registry),
            executor,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let store = StoreManager::new(config.settings_dir());
        let executor = CommandExecutor::from_config(&config.execution, config.user_home());
        Self::new(CommandRegistry::new(store), executor)
    }

    pub fn get_commands(&self) -> CommandListResponse {
        CommandListResponse {
            commands: self.registry.lock().list_commands(),
        }
    }

    pub fn get_command(&self, command_id: &str) -> Option<CommandDefinition> {
        self.registry.lock().get_command(command_id)
    }

    pub fn save_command(&self, command: CommandDefinition) -> SaveCommandResponse {
        match self.registry.lock().save_command(command) {
            Ok(saved) => SaveCommandResponse {
                success: true,
                command: Some(saved),
                error: None,
            },
            Err(RegistryError::Validation(reason)) => {
                debug!(reason = %reason, "rejected command");
                SaveCommandResponse {
                    success: false,
                    command: None,
                    error: Some(reason),
                }
            }
            Err(RegistryError::Storage(e)) => {
                error!(error = %e, "failed to save command");
                SaveCommandResponse {
                    success: false,
                    command: None,
                    error: Some(format!("Failed to save command: {}", e)),
                }
            }
        }
    }

    pub fn delete_command(&self, command_id: &str) -> OperationResponse {
        match self.registry.lock().delete_command(command_id) {
            Ok(()) => OperationResponse::ok(),
            Err(RegistryError::Validation(reason)) => OperationResponse::failed(reason),
            Err(RegistryError::Storage(e)) => {
                error!(command_id = %command_id, error = %e, "failed to delete command");
                OperationResponse::failed(format!("Failed to delete command: {}", e))
            }
        }
    }

    pub fn get_all_input_values(&self) -> BTreeMap<String, InputValueSet> {
        self.registry.lock().all_input_values()
    }

    pub fn saved_input_values(&self, command_id: &str) -> Option<InputValueSet> {
        self.registry.lock().input_values(command_id)
    }

    pub fn save_input_values(&self, command_id: &str, values: &InputValueSet) -> OperationResponse {
        match self.registry.lock().save_input_values(command_id, values) {
            Ok(()) => OperationResponse::ok(),
            Err(RegistryError::Validation(reason)) => OperationResponse::failed(reason),
            Err(RegistryError::Storage(e)) => {
                error!(command_id = %command_id, error = %e, "failed to save input values");
                OperationResponse::failed(format!("Failed to save input values: {}", e))
            }
        }
    }

    /// Looks the command up and runs it. The registry lock is released before
    /// the process starts, so concurrent executions do not wait on each other.
    pub fn execute_command(
        &self,
        command_id: &str,
        env_vars: Option<&InputValueSet>,
    ) -> ExecutionResult {
        let definition = self.registry.lock().get_command(command_id);
        let Some(definition) = definition else {
            info!(command_id = %command_id, "execute requested for unknown command");
            return ExecutionResult::failure(format!("Command not found: {}", command_id));
        };
        self.executor.execute(&definition, env_vars)
    }

    pub fn get_commands_dir_path(&self) -> String {
        self.registry
            .lock()
            .commands_dir()
            .to_string_lossy()
            .into_owned()
    }

    pub fn with_registry<R>(&self, f: impl FnOnce(&mut CommandRegistry) -> R) -> R {
        f(&mut *self.registry.lock())
    }
}
