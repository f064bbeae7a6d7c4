//! Access schema resolution - which schemas apply to an operation at a tier.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::SetupError;
use crate::schema::{Absent, ListSchema, SchemaRef};
use crate::types::{AccessTier, Operation};

/// The schemas one tier defines. Each is independently optional.
#[derive(Clone, Default)]
pub struct TierSchemas {
    pub create: Option<SchemaRef>,
    pub read: Option<SchemaRef>,
    pub update: Option<SchemaRef>,
    pub delete: Option<SchemaRef>,
}

impl fmt::Debug for TierSchemas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierSchemas")
            .field("create", &self.create.is_some())
            .field("read", &self.read.is_some())
            .field("update", &self.update.is_some())
            .field("delete", &self.delete.is_some())
            .finish()
    }
}

impl TierSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, schema: SchemaRef) -> Self {
        self.create = Some(schema);
        self
    }

    pub fn read(mut self, schema: SchemaRef) -> Self {
        self.read = Some(schema);
        self
    }

    pub fn update(mut self, schema: SchemaRef) -> Self {
        self.update = Some(schema);
        self
    }

    pub fn delete(mut self, schema: SchemaRef) -> Self {
        self.delete = Some(schema);
        self
    }

    /// The named schema deciding availability of `operation`. List uses Read's.
    pub fn named(&self, operation: Operation) -> Option<&SchemaRef> {
        match operation.schema_operation() {
            Operation::Create => self.create.as_ref(),
            Operation::Update => self.update.as_ref(),
            Operation::Delete => self.delete.as_ref(),
            _ => self.read.as_ref(),
        }
    }
}

/// Per-tier schema bundles for one resource.
#[derive(Debug, Clone, Default)]
pub struct CrudSchema {
    client: TierSchemas,
    server: TierSchemas,
    admin: TierSchemas,
}

impl CrudSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tier(mut self, tier: AccessTier, schemas: TierSchemas) -> Self {
        match tier {
            AccessTier::Client => self.client = schemas,
            AccessTier::Server => self.server = schemas,
            AccessTier::Admin => self.admin = schemas,
        }
        self
    }

    pub fn tier(&self, tier: AccessTier) -> &TierSchemas {
        match tier {
            AccessTier::Client => &self.client,
            AccessTier::Server => &self.server,
            AccessTier::Admin => &self.admin,
        }
    }

    pub fn is_available(&self, operation: Operation, tier: AccessTier) -> bool {
        self.tier(tier).named(operation).is_some()
    }

    /// Tiers at which `operation` is available, least privileged first.
    pub fn available_tiers(&self, operation: Operation) -> Vec<AccessTier> {
        AccessTier::ALL
            .into_iter()
            .filter(|tier| self.is_available(operation, *tier))
            .collect()
    }
}

/// Input and output schema of one operation at one tier.
#[derive(Debug, Clone)]
pub struct OperationSchemas {
    pub input: SchemaRef,
    pub output: SchemaRef,
}

/// Resolve the schemas of `operation` at `tier`.
///
/// Returns `None` when the operation is unavailable at that tier.
pub fn resolve(
    crud: &CrudSchema,
    operation: Operation,
    tier: AccessTier,
) -> Option<OperationSchemas> {
    let schemas = crud.tier(tier);
    let named = schemas.named(operation)?;

    let input = match operation {
        Operation::Read | Operation::List => Absent::shared(),
        _ => Arc::clone(named),
    };

    let read = schemas.read.clone().unwrap_or_else(Absent::shared);
    let output = match operation {
        Operation::List => ListSchema::shared(read),
        Operation::Delete => Absent::shared(),
        _ => read,
    };

    Some(OperationSchemas { input, output })
}

/// Availability and schemas of one operation at one tier.
#[derive(Debug, Clone)]
pub struct Capability {
    pub operation: Operation,
    pub tier: AccessTier,
    /// What this tier accepts and sees.
    pub access: OperationSchemas,
    /// The maximal shape every call cascades through first.
    pub admin: OperationSchemas,
}

/// Capabilities for every (operation, tier) pair, built once at setup.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    entries: BTreeMap<(Operation, AccessTier), Capability>,
}

impl CapabilityTable {
    /// Build the table for `operations`.
    ///
    /// Operations with no available tier are left out of the table.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::MissingAdminSchema` when a lower tier defines a
    /// schema for an operation the admin tier lacks.
    pub fn build(
        crud: &CrudSchema,
        operations: impl IntoIterator<Item = Operation>,
    ) -> Result<Self, SetupError> {
        let mut entries = BTreeMap::new();

        for operation in operations {
            let tiers = crud.available_tiers(operation);
            if tiers.is_empty() {
                continue;
            }
            let admin = resolve(crud, operation, AccessTier::Admin)
                .ok_or(SetupError::MissingAdminSchema { operation })?;

            for tier in tiers {
                if let Some(access) = resolve(crud, operation, tier) {
                    entries.insert(
                        (operation, tier),
                        Capability {
                            operation,
                            tier,
                            access,
                            admin: admin.clone(),
                        },
                    );
                }
            }
        }

        Ok(Self { entries })
    }

    pub fn get(&self, operation: Operation, tier: AccessTier) -> Option<&Capability> {
        self.entries.get(&(operation, tier))
    }

    pub fn available_tiers(&self, operation: Operation) -> Vec<AccessTier> {
        self.entries
            .keys()
            .filter(|(op, _)| *op == operation)
            .map(|(_, tier)| *tier)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.entries.values()
    }
}
