//! The global class registry: ordered canonical class names.
//!
//! The registry is an immutable value passed into every converter call. Each
//! source format maps its own local labels (string tags, numeric ids, COCO
//! category names) onto this one vocabulary; the index of a name is its
//! canonical class id.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::PrepError;

/// Ordered list of canonical class names. Index = class id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassRegistry {
    names: Vec<String>,
    index: BTreeMap<String, u32>,
}

impl ClassRegistry {
    /// Builds a registry from an ordered name list.
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as u32))
            .collect();
        Self { names, index }
    }

    /// Canonical id for a name, if registered.
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    /// Name for a canonical id, if in range.
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All names in id order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Loads a registry from a class file.
    ///
    /// Accepts either a YAML document with a `names:` entry (a sequence or an
    /// id-keyed mapping, the shapes seen in YOLO `data.yaml` files) or a
    /// plain text file with one class name per line.
    pub fn load(path: &Path) -> Result<Self, PrepError> {
        let data = fs::read_to_string(path).map_err(PrepError::Io)?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        if is_yaml {
            Self::from_yaml_str(&data, path)
        } else {
            Self::from_lines(&data, path)
        }
    }

    fn from_yaml_str(data: &str, path: &Path) -> Result<Self, PrepError> {
        let parsed: ClassesYaml =
            serde_yaml::from_str(data).map_err(|source| PrepError::RegistryParse {
                path: path.to_path_buf(),
                message: source.to_string(),
            })?;

        let names = match parsed.names {
            ClassNames::Sequence(names) => names,
            ClassNames::Mapping(mapping) => match mapping.keys().next_back().copied() {
                None => Vec::new(),
                Some(max_index) => {
                    let mut names = vec![String::new(); max_index + 1];
                    for (index, name) in mapping {
                        names[index] = name;
                    }
                    for (index, name) in names.iter_mut().enumerate() {
                        if name.trim().is_empty() {
                            return Err(PrepError::RegistryParse {
                                path: path.to_path_buf(),
                                message: format!("class id {index} has no name"),
                            });
                        }
                    }
                    names
                }
            }
        };

        Ok(Self::new(names))
    }

    fn from_lines(data: &str, path: &Path) -> Result<Self, PrepError> {
        let mut names = Vec::new();
        for (line_idx, line) in data.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return Err(PrepError::RegistryParse {
                    path: path.to_path_buf(),
                    message: format!("line {} is empty", line_idx + 1),
                });
            }
            names.push(trimmed.to_string());
        }
        Ok(Self::new(names))
    }
}

#[derive(Debug, Deserialize)]
struct ClassesYaml {
    names: ClassNames,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassNames {
    Sequence(Vec<String>),
    Mapping(BTreeMap<usize, String>),
}
