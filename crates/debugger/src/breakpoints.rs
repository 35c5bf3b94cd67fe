use std::collections::HashMap;

use parking_lot::Mutex;

use crate::{
    error::Result,
    gateway::{Command, CommandGateway, GatewayExt},
    types::{Breakpoint, BreakpointId},
};

#[derive(Debug, Default)]
struct Table {
    entries: Vec<Breakpoint>,
    index: HashMap<BreakpointId, usize>,
}

impl Table {
    fn register(&mut self, breakpoint: Breakpoint) -> bool {
        if self.index.contains_key(&breakpoint.id) {
            tracing::debug!(id = %breakpoint.id, "breakpoint already known");
            return false;
        }
        self.index.insert(breakpoint.id.clone(), self.entries.len());
        self.entries.push(breakpoint);
        true
    }

    fn get_mut(&mut self, id: &BreakpointId) -> Option<&mut Breakpoint> {
        let slot = *self.index.get(id)?;
        self.entries.get_mut(slot)
    }
}

/// Known breakpoints, keyed by their backend id.
///
/// The enabled flag only ever changes after the backend has confirmed it.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    table: Mutex<Table>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a breakpoint at `location` (`file:line` or a function name).
    ///
    /// Returns the breakpoint as the backend reported it. If its id is
    /// already registered the existing entry is kept.
    #[tracing::instrument(skip(self, gateway))]
    pub async fn insert<G>(&self, gateway: &G, location: &str) -> Result<Breakpoint>
    where
        G: CommandGateway + ?Sized,
    {
        let breakpoint = gateway.breakpoint_insert(location).await?;
        if self.table.lock().register(breakpoint.clone()) {
            tracing::debug!(id = %breakpoint.id, %location, "breakpoint inserted");
        }
        Ok(breakpoint)
    }

    pub async fn enable<G>(&self, gateway: &G, id: &BreakpointId) -> Result<()>
    where
        G: CommandGateway + ?Sized,
    {
        self.set_enabled(gateway, id, true).await
    }

    pub async fn disable<G>(&self, gateway: &G, id: &BreakpointId) -> Result<()>
    where
        G: CommandGateway + ?Sized,
    {
        self.set_enabled(gateway, id, false).await
    }

    #[tracing::instrument(skip(self, gateway))]
    async fn set_enabled<G>(&self, gateway: &G, id: &BreakpointId, enabled: bool) -> Result<()>
    where
        G: CommandGateway + ?Sized,
    {
        let ids = vec![id.clone()];
        let command = if enabled {
            Command::BreakpointEnable { ids }
        } else {
            Command::BreakpointDisable { ids }
        };
        gateway.call(command).await?;

        match self.table.lock().get_mut(id) {
            Some(breakpoint) => breakpoint.enabled = enabled,
            None => tracing::warn!(%id, "backend confirmed a breakpoint that is not registered"),
        }
        Ok(())
    }

    /// Load the backend's breakpoint table. Unknown breakpoints are added and
    /// known ones take the backend's enabled flag. Returns how many were
    /// added.
    #[tracing::instrument(skip_all)]
    pub async fn refresh<G>(&self, gateway: &G) -> Result<usize>
    where
        G: CommandGateway + ?Sized,
    {
        let listed = gateway.breakpoint_list().await?;

        let mut table = self.table.lock();
        let mut added = 0;
        for breakpoint in listed {
            match table.get_mut(&breakpoint.id) {
                Some(existing) => existing.enabled = breakpoint.enabled,
                None => {
                    table.register(breakpoint);
                    added += 1;
                }
            }
        }
        tracing::debug!(added, total = table.entries.len(), "breakpoint table loaded");
        Ok(added)
    }

    /// Breakpoints in the order they were registered.
    pub fn list(&self) -> Vec<Breakpoint> {
        self.table.lock().entries.clone()
    }

    pub fn get(&self, id: &BreakpointId) -> Option<Breakpoint> {
        let table = self.table.lock();
        table.index.get(id).map(|&slot| table.entries[slot].clone())
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SessionError, testing::ScriptedGateway};
    use serde_json::json;

    fn inserted(id: &str, line: u32) -> serde_json::Value {
        json!({"bkpt": {
            "number": id, "type": "breakpoint", "enabled": "y",
            "func": "main.main", "file": "main.go", "line": line.to_string()
        }})
    }

    #[tokio::test]
    async fn insert_registers_once() {
        let gateway = ScriptedGateway::new();
        gateway.reply("breakpoint.insert", inserted("1", 12));
        gateway.reply("breakpoint.insert", inserted("1", 12));
        let registry = BreakpointRegistry::new();

        registry.insert(&gateway, "main.go:12").await.unwrap();
        let again = registry.insert(&gateway, "main.go:12").await.unwrap();

        assert_eq!(again.id, BreakpointId::from("1"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn rejected_insert_changes_nothing() {
        let gateway = ScriptedGateway::new();
        gateway.reject("breakpoint.insert", "No symbol table is loaded.");
        let registry = BreakpointRegistry::new();

        let err = registry.insert(&gateway, "nowhere").await.unwrap_err();
        assert!(matches!(err, SessionError::BackendRejection { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn failed_enable_leaves_flag_unchanged() {
        let gateway = ScriptedGateway::new();
        gateway.reply("breakpoint.insert", inserted("3", 7));
        gateway.reply("breakpoint.disable", json!({}));
        gateway.reject("breakpoint.enable", "connection reset");
        let registry = BreakpointRegistry::new();
        let id = BreakpointId::from("3");

        registry.insert(&gateway, "main.go:7").await.unwrap();
        registry.disable(&gateway, &id).await.unwrap();
        assert!(!registry.get(&id).unwrap().enabled);

        assert!(registry.enable(&gateway, &id).await.is_err());
        assert!(!registry.get(&id).unwrap().enabled);
        assert_eq!(
            gateway.calls().last(),
            Some(&Command::BreakpointEnable {
                ids: vec![id.clone()]
            })
        );
    }

    #[tokio::test]
    async fn flag_waits_for_confirmation() {
        let gateway = ScriptedGateway::new();
        gateway.reply("breakpoint.insert", inserted("1", 5));
        let registry = BreakpointRegistry::new();
        registry.insert(&gateway, "main.go:5").await.unwrap();
        let id = BreakpointId::from("1");

        let release = gateway.defer("breakpoint.disable");
        let pending = registry.disable(&gateway, &id);
        tokio::pin!(pending);

        // not yet answered
        assert!(futures::poll!(pending.as_mut()).is_pending());
        assert!(registry.get(&id).unwrap().enabled);

        release.succeed(json!({}));
        pending.await.unwrap();
        assert!(!registry.get(&id).unwrap().enabled);
    }

    #[tokio::test]
    async fn refresh_adopts_backend_table() {
        let gateway = ScriptedGateway::new();
        gateway.reply("breakpoint.insert", inserted("1", 5));
        gateway.reply(
            "breakpoint.list",
            json!({"BreakPointTable": {"body": [
                {"number": "1", "enabled": "n", "func": "main.main", "file": "main.go", "line": "5"},
                {"number": "2", "enabled": "y", "func": "main.worker", "file": "worker.go", "line": "20"}
            ]}}),
        );
        let registry = BreakpointRegistry::new();
        registry.insert(&gateway, "main.go:5").await.unwrap();

        assert_eq!(registry.refresh(&gateway).await.unwrap(), 1);
        let ids: Vec<_> = registry.list().into_iter().map(|b| (b.id, b.enabled)).collect();
        assert_eq!(
            ids,
            vec![(BreakpointId::from("1"), false), (BreakpointId::from("2"), true)]
        );
    }
}
