use std::fmt;

/// Insight level ingested by its own flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Campaign,
    Ad,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Campaign => "campaign",
            Entity::Ad => "ad",
        }
    }

    /// Column holding the ID that drives the metadata cascade.
    pub fn id_column(&self) -> &'static str {
        match self {
            Entity::Campaign => "campaign_id",
            Entity::Ad => "ad_id",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive entity kinds stored in ID-keyed metadata tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    Campaign,
    Adset,
    Ad,
    Creative,
}

impl MetadataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKind::Campaign => "campaign",
            MetadataKind::Adset => "adset",
            MetadataKind::Ad => "ad",
            MetadataKind::Creative => "creative",
        }
    }

    /// Natural key column besides `account_id`. Creatives are keyed by the ad they belong to.
    pub fn id_column(&self) -> &'static str {
        match self {
            MetadataKind::Campaign => "campaign_id",
            MetadataKind::Adset => "adset_id",
            MetadataKind::Ad | MetadataKind::Creative => "ad_id",
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified `project.dataset.table` destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableTarget {
    project: String,
    dataset: String,
    table: String,
}

impl TableTarget {
    pub fn new(project: &str, dataset: &str, table: &str) -> Self {
        TableTarget {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}.{}.{}", self.project, self.dataset, self.table)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Sibling table in the same dataset, e.g. for delete-key staging.
    pub fn sibling(&self, table: &str) -> Self {
        TableTarget {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: table.to_string(),
        }
    }
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Deterministic naming of raw-layer tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNaming {
    pub project: String,
    pub company: String,
    pub platform: String,
    pub department: String,
    pub account: String,
}

impl TableNaming {
    pub fn raw_dataset(&self) -> String {
        format!("{}_dataset_{}_api_raw", self.company, self.platform)
    }

    /// Any raw-layer table, named by what follows the account prefix,
    /// e.g. `campaign_m052024` or `adset_metadata`.
    pub fn raw(&self, suffix: &str) -> TableTarget {
        let table = format!(
            "{}_table_{}_{}_{}_{}",
            self.company, self.platform, self.department, self.account, suffix
        );
        TableTarget::new(&self.project, &self.raw_dataset(), &table)
    }

    /// One insights table per calendar month.
    pub fn insights(&self, entity: Entity, year: i32, month: u32) -> TableTarget {
        self.raw(&format!("{}_m{:02}{}", entity.as_str(), month, year))
    }

    pub fn metadata(&self, kind: MetadataKind) -> TableTarget {
        self.raw(&format!("{}_metadata", kind.as_str()))
    }
}
