use crate::error::{RegistryError, RegistryResult};
use crate::storage::{CommandDefinition, InputValueSet};
use crate::store_manager::{RecordKind, StoreManager};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// In-memory view of the stored commands.
///
/// Every query reloads from disk first, so the cache never outlives one
/// operation and external edits to the commands directory show up at once.
pub struct CommandRegistry {
    store: StoreManager,
    commands: BTreeMap<String, CommandDefinition>,
}

impl CommandRegistry {
    pub fn new(store: StoreManager) -> Self {
        Self {
            store,
            commands: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &StoreManager {
        &self.store
    }

    pub fn commands_dir(&self) -> PathBuf {
        match self.store.ensure_dir(RecordKind::Commands) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "commands directory unavailable");
                self.store.dir_path(RecordKind::Commands)
            }
        }
    }

    /// Replaces the cache with what is on disk and returns the command count.
    pub fn reload(&mut self) -> usize {
        self.commands = self.store.load_all();
        self.commands.len()
    }

    pub fn list_commands(&mut self) -> Vec<CommandDefinition> {
        self.reload();
        self.commands.values().cloned().collect()
    }

    pub fn get_command(&mut self, id: &str) -> Option<CommandDefinition> {
        self.reload();
        self.commands.get(id).cloned()
    }

    /// Validates and persists `definition`, assigning a fresh id when it has none.
    pub fn save_command(&mut self, mut definition: CommandDefinition) -> RegistryResult<CommandDefinition> {
        if definition.id.is_empty() {
            definition.id = Uuid::new_v4().to_string();
        }

        validate_id(&definition.id)?;
        if definition.title.is_empty() {
            return Err(RegistryError::validation("Title is required"));
        }
        if definition.command.is_empty() {
            return Err(RegistryError::validation("Command is required"));
        }

        self.store.save(&definition.id, &definition)?;
        info!(command_id = %definition.id, title = %definition.title, "saved command");
        self.commands.insert(definition.id.clone(), definition.clone());
        Ok(definition)
    }

    /// Deletes a command and, best effort, its input values. Unknown ids succeed,
    /// including ids that could never have been saved.
    pub fn delete_command(&mut self, id: &str) -> RegistryResult<()> {
        if validate_id(id).is_err() {
            debug!(command_id = %id, "no command can have this id, nothing to delete");
            return Ok(());
        }
        self.store.delete(RecordKind::Commands, id)?;
        self.commands.remove(id);

        if let Err(e) = self.store.delete(RecordKind::Inputs, id) {
            error!(command_id = %id, error = %e, "failed to delete input values");
        }
        info!(command_id = %id, "deleted command");
        Ok(())
    }

    pub fn all_input_values(&self) -> BTreeMap<String, InputValueSet> {
        self.store.load_all()
    }

    pub fn input_values(&self, command_id: &str) -> Option<InputValueSet> {
        self.all_input_values().remove(command_id)
    }

    /// Replaces the stored input values for `command_id`.
    pub fn save_input_values(&self, command_id: &str, values: &InputValueSet) -> RegistryResult<()> {
        if command_id.is_empty() {
            return Err(RegistryError::validation("Command id is required"));
        }
        validate_id(command_id)?;
        self.store.save(command_id, values)?;
        debug!(command_id = %command_id, fields = values.0.len(), "saved input values");
        Ok(())
    }
}

/// Ids become file names, so they must be a single plain path component.
fn validate_id(id: &str) -> RegistryResult<()> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(RegistryError::validation("Invalid command id"));
    }
    Ok(())
}
