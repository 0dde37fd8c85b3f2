//! Maps protocol names to their crackers.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    cracker::{
        ClickHouseCracker,
        Cracker,
        ElasticCracker,
        FtpCracker,
        MongoCracker,
        MssqlCracker,
        MysqlCracker,
        OracleCracker,
        OracleSidCracker,
        PostgresCracker,
        RdpCracker,
        RedisCracker,
        SmbCracker,
        SnmpCracker,
        SshCracker,
        TelnetCracker,
    },
    error::{Error, Result},
};

/// Thread-safe protocol-name → cracker mapping. Populated at startup and only
/// read while scans run.
#[derive(Default)]
pub struct Registry {
    crackers: RwLock<HashMap<&'static str, Arc<dyn Cracker>>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in protocol probe.
    pub fn builtin() -> Self {
        let registry = Self::new();
        let crackers: [Arc<dyn Cracker>; 15] = [
            Arc::new(SshCracker),
            Arc::new(MysqlCracker),
            Arc::new(PostgresCracker),
            Arc::new(MssqlCracker),
            Arc::new(OracleCracker),
            Arc::new(OracleSidCracker),
            Arc::new(MongoCracker),
            Arc::new(RedisCracker),
            Arc::new(ClickHouseCracker),
            Arc::new(FtpCracker),
            Arc::new(SmbCracker),
            Arc::new(RdpCracker),
            Arc::new(SnmpCracker),
            Arc::new(TelnetCracker),
            Arc::new(ElasticCracker),
        ];
        for cracker in crackers {
            // Built-in names are distinct by construction.
            let _ = registry.register(cracker);
        }
        registry
    }

    /// Registers a cracker under its name. Names are unique; a duplicate is an
    /// internal error, since it would silently shadow an existing probe.
    pub fn register(&self, cracker: Arc<dyn Cracker>) -> Result<()> {
        let name = cracker.name();
        let mut crackers = self.crackers.write().unwrap();
        if crackers.contains_key(name) {
            return Err(Error::internal(format!("cracker {name:?} already registered")));
        }
        crackers.insert(name, cracker);
        Ok(())
    }

    /// Looks up a cracker by protocol name.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Cracker>> {
        self.crackers.read().unwrap().get(name).cloned()
    }

    /// The registered protocol names, unordered.
    pub fn names(&self) -> Vec<&'static str> {
        self.crackers.read().unwrap().keys().copied().collect()
    }
}
