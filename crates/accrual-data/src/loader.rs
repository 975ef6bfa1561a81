//! Resolution pipeline: reads data files, resolves cross-references, builds rules.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers, plus [`ContentFiles`], the parsed-but-unresolved
//! form of a content directory.

use crate::schema::*;
use accrual_core::state::{Building, Resource, Upgrade};
use accrual_core::template::{
    ConversionDef, EffectSource, PurchaseTrigger, Rules, TargetedEffect, TemplateBuilder,
    TemplateError,
};
use accrual_core::unlock::{ConditionKind, UnlockCondition, UnlockKind, UnlockableItem};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: &'static str, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// An entry is well-formed but contradicts itself.
    #[error("invalid entry in {file}: {detail}")]
    Invalid { file: PathBuf, detail: String },

    /// The resolved content failed template validation.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Looks for `{base_name}.ron`, `{base_name}.toml`, and `{base_name}.json`.
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but a missing file is an error.
pub fn require_data_file(dir: &Path, base_name: &'static str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name,
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(file: &Path, detail: impl ToString) -> DataLoadError {
    DataLoadError::Parse {
        file: file.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// RON files may write optional fields bare, with or without the
/// `implicit_some` header.
fn ron_options() -> ron::Options {
    ron::Options::default().with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
}

/// Deserialize `content` in `format`. `file` names the origin in errors.
pub fn parse_str<T: DeserializeOwned>(
    format: Format,
    content: &str,
    file: &Path,
) -> Result<T, DataLoadError> {
    match format {
        Format::Ron => ron_options()
            .from_str(content)
            .map_err(|e| parse_error(file, e)),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_error(file, e)),
        Format::Toml => toml::from_str(content).map_err(|e| parse_error(file, e)),
    }
}

/// Deserialize a list from `content`. TOML has no top-level arrays, so the
/// list is read from `toml_key` in a top-level table; a TOML file without
/// that key is an empty list.
pub fn parse_list_str<T: DeserializeOwned>(
    format: Format,
    content: &str,
    file: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    match format {
        Format::Ron | Format::Json => parse_str(format, content, file),
        Format::Toml => {
            let table: toml::Table = toml::from_str(content).map_err(|e| parse_error(file, e))?;
            match table.get(toml_key) {
                Some(array) => array
                    .clone()
                    .try_into()
                    .map_err(|e: toml::de::Error| parse_error(file, e)),
                None => Ok(Vec::new()),
            }
        }
    }
}

/// Read a file and deserialize it according to its format.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    parse_str(format, &content, path)
}

/// Read a file and deserialize it as a list. See [`parse_list_str`].
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    parse_list_str(format, &content, path, toml_key)
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Check whether a name already exists in a map, returning a `DuplicateName`
/// error if so.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

fn unresolved(file: &Path, name: &str, expected_kind: &'static str) -> DataLoadError {
    DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    }
}

fn kind_name(kind: UnlockKind) -> &'static str {
    match kind {
        UnlockKind::Resource => "resource",
        UnlockKind::Building => "building",
        UnlockKind::Upgrade => "upgrade",
        UnlockKind::Feature => "feature",
    }
}

fn condition_name(kind: ConditionKind) -> &'static str {
    match kind {
        ConditionKind::Resource => "resource",
        ConditionKind::Building => "building",
        ConditionKind::Upgrade => "upgrade",
        ConditionKind::Counter => "counter",
        ConditionKind::Feature => "feature",
        ConditionKind::Unknown => "condition target",
    }
}

/// Index a list by name, rejecting duplicates.
fn index<'a, T>(
    list: &'a Sourced<T>,
    name: impl Fn(&T) -> &str,
) -> Result<HashMap<String, &'a T>, DataLoadError> {
    let mut map = HashMap::new();
    for item in &list.items {
        let n = name(item);
        check_duplicate(&map, n, &list.file)?;
        map.insert(n.to_string(), item);
    }
    Ok(map)
}

// ===========================================================================
// Content files
// ===========================================================================

/// A parsed list and the file it came from.
#[derive(Debug, Clone)]
pub struct Sourced<T> {
    pub file: PathBuf,
    pub items: Vec<T>,
}

impl<T> Sourced<T> {
    fn empty(file: PathBuf) -> Self {
        Self {
            file,
            items: Vec::new(),
        }
    }
}

/// A parsed single-value file and its path.
#[derive(Debug, Clone)]
pub struct Located<T> {
    pub file: PathBuf,
    pub value: T,
}

/// Every content table of one content set, parsed but not yet resolved.
///
/// `resources` and `buildings` are required; every other table may be
/// absent.
#[derive(Debug, Clone)]
pub struct ContentFiles {
    pub resources: Sourced<ResourceData>,
    pub buildings: Sourced<BuildingData>,
    pub upgrades: Sourced<UpgradeData>,
    pub counters: Sourced<String>,
    pub features: Sourced<FeatureData>,
    pub unlocks: Sourced<UnlockData>,
    pub triggers: Sourced<TriggerData>,
    pub gates: Sourced<GateData>,
    pub effects: Sourced<EffectData>,
    pub conversions: Sourced<ConversionData>,
    pub mining: Option<Located<MiningData>>,
    pub config: Option<ConfigData>,
}

fn read_list<T: DeserializeOwned>(dir: &Path, base: &str) -> Result<Sourced<T>, DataLoadError> {
    match find_data_file(dir, base)? {
        Some(file) => {
            let items = deserialize_list(&file, base)?;
            debug!(file = %file.display(), entries = items.len(), "read content table");
            Ok(Sourced { file, items })
        }
        None => Ok(Sourced::empty(dir.join(base))),
    }
}

fn read_required_list<T: DeserializeOwned>(
    dir: &Path,
    base: &'static str,
) -> Result<Sourced<T>, DataLoadError> {
    let file = require_data_file(dir, base)?;
    let items = deserialize_list(&file, base)?;
    debug!(file = %file.display(), entries = items.len(), "read content table");
    Ok(Sourced { file, items })
}

fn read_single<T: DeserializeOwned>(
    dir: &Path,
    base: &str,
) -> Result<Option<Located<T>>, DataLoadError> {
    match find_data_file(dir, base)? {
        Some(file) => {
            let value = deserialize_file(&file)?;
            Ok(Some(Located { file, value }))
        }
        None => Ok(None),
    }
}

impl ContentFiles {
    /// Read every content table from `dir`.
    pub fn read_dir(dir: &Path) -> Result<Self, DataLoadError> {
        Ok(Self {
            resources: read_required_list(dir, "resources")?,
            buildings: read_required_list(dir, "buildings")?,
            upgrades: read_list(dir, "upgrades")?,
            counters: read_list(dir, "counters")?,
            features: read_list(dir, "features")?,
            unlocks: read_list(dir, "unlocks")?,
            triggers: read_list(dir, "triggers")?,
            gates: read_list(dir, "gates")?,
            effects: read_list(dir, "effects")?,
            conversions: read_list(dir, "conversions")?,
            mining: read_single(dir, "mining")?,
            config: read_single(dir, "config")?.map(|c: Located<ConfigData>| c.value),
        })
    }

    /// Resolve cross-references and build validated [`Rules`].
    ///
    /// Names are checked here so errors can point at the file that holds the
    /// bad reference; numeric validation is left to
    /// [`TemplateBuilder::build`].
    pub fn resolve(self) -> Result<Rules, DataLoadError> {
        let resources = index(&self.resources, |r| r.id.as_str())?;
        let buildings = index(&self.buildings, |b| b.id.as_str())?;
        let upgrades = index(&self.upgrades, |u| u.id.as_str())?;
        let counters = index(&self.counters, |c| c.as_str())?;
        let features = index(&self.features, |f| f.id.as_str())?;
        index(&self.unlocks, |u| u.id.as_str())?;

        let mut builder = TemplateBuilder::new();

        for r in &self.resources.items {
            let mut resource = Resource::new(r.id.as_str(), r.max.unwrap_or(f64::INFINITY));
            resource.base_production = r.base_production;
            resource.unlocked = r.unlocked;
            resource.kind = r.kind;
            builder.register_resource(resource);
        }

        for b in &self.buildings.items {
            for res in b.cost.keys().chain(b.consumption.keys()) {
                resolve_name(&resources, res, &self.buildings.file, "resource")?;
            }
            let mut building = Building::new(b.id.as_str());
            building.cost = b.cost.iter().map(|(k, v)| (k.as_str().into(), *v)).collect();
            building.cost_multiplier = b.cost_multiplier;
            building.production = b.production.clone();
            building.consumption = b
                .consumption
                .iter()
                .map(|(k, v)| (k.as_str().into(), *v))
                .collect();
            building.unlocked = b.unlocked;
            builder.register_building(building);
        }

        for u in &self.upgrades.items {
            for res in u.cost.keys() {
                resolve_name(&resources, res, &self.upgrades.file, "resource")?;
            }
            let mut upgrade = Upgrade::new(u.id.as_str());
            upgrade.cost = u.cost.iter().map(|(k, v)| (k.as_str().into(), *v)).collect();
            upgrade.effects = u.effects.clone();
            upgrade.unlocked = u.unlocked;
            builder.register_upgrade(upgrade);
        }

        for c in &self.counters.items {
            builder.register_counter(c.as_str());
        }
        for f in &self.features.items {
            builder.register_feature(f.id.as_str(), f.enabled);
        }

        let file = &self.unlocks.file;
        for u in &self.unlocks.items {
            let known = match u.kind {
                UnlockKind::Resource => resources.contains_key(&u.id),
                UnlockKind::Building => buildings.contains_key(&u.id),
                UnlockKind::Upgrade => upgrades.contains_key(&u.id),
                UnlockKind::Feature => features.contains_key(&u.id),
            };
            if !known {
                return Err(unresolved(file, &u.id, kind_name(u.kind)));
            }
            let mut conditions = Vec::with_capacity(u.conditions.len());
            for c in &u.conditions {
                let known = match c.kind {
                    ConditionKind::Resource => resources.contains_key(&c.target),
                    ConditionKind::Building => buildings.contains_key(&c.target),
                    ConditionKind::Upgrade => upgrades.contains_key(&c.target),
                    ConditionKind::Counter => counters.contains_key(&c.target),
                    ConditionKind::Feature => features.contains_key(&c.target),
                    // Evaluates to false; kept so newer content still loads.
                    ConditionKind::Unknown => true,
                };
                if !known {
                    return Err(unresolved(file, &c.target, condition_name(c.kind)));
                }
                let id = c
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("{}.{}", u.id, c.target));
                conditions.push(UnlockCondition::new(
                    id,
                    c.kind,
                    c.target.as_str(),
                    c.operator,
                    c.value,
                ));
            }
            builder.register_unlock(UnlockableItem {
                id: u.id.clone(),
                kind: u.kind,
                conditions,
                auto_unlock: u.auto_unlock,
                influences_others: u.influences_others,
            });
        }

        let file = &self.triggers.file;
        for t in &self.triggers.items {
            resolve_name(&buildings, &t.building, file, "building")?;
            for r in &t.resources {
                resolve_name(&resources, r, file, "resource")?;
            }
            for b in &t.buildings {
                resolve_name(&buildings, b, file, "building")?;
            }
            for u in &t.upgrades {
                resolve_name(&upgrades, u, file, "upgrade")?;
            }
            for f in &t.features {
                resolve_name(&features, f, file, "feature")?;
            }
            builder.register_trigger(PurchaseTrigger {
                building: t.building.as_str().into(),
                on_count: t.on_count,
                resources: t.resources.iter().map(|s| s.as_str().into()).collect(),
                buildings: t.buildings.iter().map(|s| s.as_str().into()).collect(),
                upgrades: t.upgrades.iter().map(|s| s.as_str().into()).collect(),
                features: t.features.iter().map(|s| s.as_str().into()).collect(),
            });
        }

        let file = &self.gates.file;
        for g in &self.gates.items {
            resolve_name(&resources, &g.resource, file, "resource")?;
            resolve_name(&buildings, &g.building, file, "building")?;
            builder.purchase_gate(g.resource.as_str(), g.building.as_str());
        }

        let file = &self.effects.file;
        for e in &self.effects.items {
            let source = match (&e.building, &e.upgrade) {
                (Some(b), None) => {
                    resolve_name(&buildings, b, file, "building")?;
                    EffectSource::Building(b.as_str().into())
                }
                (None, Some(u)) => {
                    resolve_name(&upgrades, u, file, "upgrade")?;
                    EffectSource::Upgrade(u.as_str().into())
                }
                _ => {
                    return Err(DataLoadError::Invalid {
                        file: file.clone(),
                        detail: format!(
                            "effect on '{}' needs exactly one of building or upgrade",
                            e.target
                        ),
                    });
                }
            };
            resolve_name(&resources, &e.target, file, "resource")?;
            builder.register_targeted_effect(TargetedEffect {
                source,
                target: e.target.as_str().into(),
                percent: e.percent,
            });
        }

        let file = &self.conversions.file;
        for c in &self.conversions.items {
            resolve_name(&buildings, &c.building, file, "building")?;
            resolve_name(&resources, &c.output, file, "resource")?;
            for input in c.inputs.keys() {
                resolve_name(&resources, input, file, "resource")?;
            }
            builder.register_conversion(ConversionDef {
                building: c.building.as_str().into(),
                output: c.output.as_str().into(),
                base_rate: c.base_rate,
                inputs: c.inputs.iter().map(|(k, v)| (k.as_str().into(), *v)).collect(),
            });
        }

        if let Some(Located { file, value }) = self.mining {
            for r in [&value.compute_resource, &value.mined_resource, &value.exchange_target] {
                resolve_name(&resources, r, &file, "resource")?;
            }
            builder.mining(value.into());
        }

        let template = builder.build()?;
        info!(
            resources = template.resources.len(),
            buildings = template.buildings.len(),
            upgrades = template.upgrades.len(),
            unlocks = template.unlocks.len(),
            "content resolved"
        );
        Ok(Rules::new(template, self.config.unwrap_or_default()))
    }
}

/// Load and resolve the content directory at `dir`.
pub fn load_rules(dir: &Path) -> Result<Rules, DataLoadError> {
    info!(dir = %dir.display(), "loading content");
    ContentFiles::read_dir(dir)?.resolve()
}

// ===========================================================================
// Tests
// ===========================================================================
