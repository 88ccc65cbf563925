//! Boss definition loading
//!
//! Reads `[[boss]]` tables from TOML files. A directory load walks the tree
//! recursively and merges every `.toml` file it finds; later files win on
//! duplicate ids.

use hashbrown::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::definition::{BossConfig, BossDefinition};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("boss '{id}' in {path} has invalid stats: {reason}")]
    Invalid {
        id: String,
        path: String,
        reason: String,
    },
}

/// Load boss definitions from a single TOML file.
pub fn load_bosses_from_file(path: &Path) -> Result<Vec<BossDefinition>, LoadError> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: display.clone(),
        source,
    })?;

    let config: BossConfig = toml::from_str(&content).map_err(|source| LoadError::Parse {
        path: display.clone(),
        source: Box::new(source),
    })?;

    let mut bosses = Vec::with_capacity(config.bosses.len());
    for boss in config.bosses {
        validate(&boss, &display)?;
        bosses.push(boss.normalized());
    }
    Ok(bosses)
}

/// Load all boss definitions from a directory tree.
pub fn load_bosses_from_dir(dir: &Path) -> Result<Vec<BossDefinition>, LoadError> {
    let mut by_id: HashMap<String, BossDefinition> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    walk(dir, &mut by_id, &mut order)?;

    let loaded = order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect::<Vec<_>>();
    tracing::info!(count = loaded.len(), dir = %dir.display(), "loaded boss definitions");
    Ok(loaded)
}

fn walk(
    dir: &Path,
    by_id: &mut HashMap<String, BossDefinition>,
    order: &mut Vec<String>,
) -> Result<(), LoadError> {
    let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut paths: Vec<_> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    // Stable traversal order regardless of filesystem
    paths.sort();

    for path in paths {
        if path.is_dir() {
            walk(&path, by_id, order)?;
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            for boss in load_bosses_from_file(&path)? {
                if !by_id.contains_key(&boss.id) {
                    order.push(boss.id.clone());
                }
                by_id.insert(boss.id.clone(), boss);
            }
        }
    }
    Ok(())
}

fn validate(boss: &BossDefinition, path: &str) -> Result<(), LoadError> {
    let fail = |reason: &str| LoadError::Invalid {
        id: boss.id.clone(),
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if boss.id.is_empty() {
        return Err(fail("empty id"));
    }
    if boss.hp_max <= 0 {
        return Err(fail("hp_max must be positive"));
    }
    if boss.attack < 0 || boss.defense < 0 || boss.speed <= 0 {
        return Err(fail("attack/defense must be non-negative and speed positive"));
    }
    for phase in &boss.phases {
        if !(phase.hp_ratio > 0.0 && phase.hp_ratio < 1.0) {
            return Err(fail("phase hp_ratio must be in (0, 1)"));
        }
    }
    if let Some(enrage) = &boss.enrage
        && !(enrage.hp_ratio > 0.0 && enrage.hp_ratio < 1.0)
    {
        return Err(fail("enrage hp_ratio must be in (0, 1)"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_from_dir_merges_and_dedupes() {
        let dir = std::env::temp_dir().join(format!("warband-loader-{}", std::process::id()));
        let sub = dir.join("extra");
        fs::create_dir_all(&sub).unwrap();

        write_file(
            &dir,
            "a.toml",
            r#"
[[boss]]
id = "alpha"
name = "Alpha"
hp_max = 1000
attack = 10
"#,
        );
        write_file(
            &sub,
            "b.toml",
            r#"
[[boss]]
id = "alpha"
name = "Alpha Override"
hp_max = 2000
attack = 20

[[boss]]
id = "beta"
name = "Beta"
hp_max = 500
attack = 5
"#,
        );

        let bosses = load_bosses_from_dir(&dir).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(bosses.len(), 2);
        // a.toml sorts before extra/, so the override from extra/b.toml wins
        let alpha = bosses.iter().find(|b| b.id == "alpha").unwrap();
        assert_eq!(alpha.hp_max, 2000);
    }

    #[test]
    fn test_invalid_stats_rejected() {
        let dir = std::env::temp_dir().join(format!("warband-loader-bad-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_file(
            &dir,
            "bad.toml",
            r#"
[[boss]]
id = "broken"
name = "Broken"
hp_max = 0
attack = 10
"#,
        );

        let err = load_bosses_from_dir(&dir).unwrap_err();
        fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(err, LoadError::Invalid { .. }));
    }
}
