//! The bundled standard content set.
//!
//! The same RON files that live under `data/standard/` are compiled into the
//! binary, so a host can start a game without shipping a content directory.

use crate::loader::{
    parse_list_str, parse_str, ContentFiles, DataLoadError, Format, Located, Sourced,
};
use accrual_core::template::Rules;
use serde::de::DeserializeOwned;
use std::path::PathBuf;

macro_rules! bundled {
    ($name:literal) => {
        (
            concat!("standard/", $name, ".ron"),
            include_str!(concat!("../data/standard/", $name, ".ron")),
        )
    };
}

type Bundled = (&'static str, &'static str);

const RESOURCES: Bundled = bundled!("resources");
const BUILDINGS: Bundled = bundled!("buildings");
const UPGRADES: Bundled = bundled!("upgrades");
const COUNTERS: Bundled = bundled!("counters");
const FEATURES: Bundled = bundled!("features");
const UNLOCKS: Bundled = bundled!("unlocks");
const TRIGGERS: Bundled = bundled!("triggers");
const GATES: Bundled = bundled!("gates");
const EFFECTS: Bundled = bundled!("effects");
const CONVERSIONS: Bundled = bundled!("conversions");
const MINING: Bundled = bundled!("mining");
const CONFIG: Bundled = bundled!("config");

fn list<T: DeserializeOwned>((name, content): Bundled) -> Result<Sourced<T>, DataLoadError> {
    let file = PathBuf::from(name);
    let items = parse_list_str(Format::Ron, content, &file, "")?;
    Ok(Sourced { file, items })
}

fn single<T: DeserializeOwned>((name, content): Bundled) -> Result<Located<T>, DataLoadError> {
    let file = PathBuf::from(name);
    let value = parse_str(Format::Ron, content, &file)?;
    Ok(Located { file, value })
}

/// Parse the bundled content tables.
pub fn standard_content() -> Result<ContentFiles, DataLoadError> {
    Ok(ContentFiles {
        resources: list(RESOURCES)?,
        buildings: list(BUILDINGS)?,
        upgrades: list(UPGRADES)?,
        counters: list(COUNTERS)?,
        features: list(FEATURES)?,
        unlocks: list(UNLOCKS)?,
        triggers: list(TRIGGERS)?,
        gates: list(GATES)?,
        effects: list(EFFECTS)?,
        conversions: list(CONVERSIONS)?,
        mining: Some(single(MINING)?),
        config: Some(single(CONFIG)?.value),
    })
}

/// Rules for the bundled standard content.
pub fn standard_rules() -> Result<Rules, DataLoadError> {
    standard_content()?.resolve()
}
