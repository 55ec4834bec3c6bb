use crate::config::ConfigError;
use serde::Deserialize;
use std::fmt;

/// Role of a parameter in the model: fed as input, predicted as output,
/// or both. Closed set so role-based filtering is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Input,
    Output,
    InputOutput,
}

impl ParamKind {
    pub fn is_input(self) -> bool {
        matches!(self, ParamKind::Input | ParamKind::InputOutput)
    }

    pub fn is_output(self) -> bool {
        matches!(self, ParamKind::Output | ParamKind::InputOutput)
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Input => write!(f, "input"),
            ParamKind::Output => write!(f, "output"),
            ParamKind::InputOutput => write!(f, "input_output"),
        }
    }
}

/// A meteorological parameter with its vertical levels.
///
/// Level order is significant: it fixes the channel layout of every
/// tensor built from this parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub id: String,
    pub levels: Vec<i64>,
    pub kind: ParamKind,
}

/// One tensor channel: a (parameter, level) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    pub param: String,
    pub level: i64,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.param, self.level)
    }
}

/// Insertion-ordered registry of parameters. Ordering is stable across
/// calls and defines tensor channel ordering.
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    params: Vec<ParameterSpec>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: &str,
        levels: Vec<i64>,
        kind: ParamKind,
    ) -> Result<&ParameterSpec, ConfigError> {
        if self.params.iter().any(|p| p.id == id) {
            return Err(ConfigError::DuplicateParam(id.to_string()));
        }
        if levels.is_empty() {
            return Err(ConfigError::EmptyLevels(id.to_string()));
        }
        for (i, level) in levels.iter().enumerate() {
            if levels[..i].contains(level) {
                return Err(ConfigError::Invalid(format!(
                    "parameter '{id}' lists level {level} twice"
                )));
            }
        }
        self.params.push(ParameterSpec {
            id: id.to_string(),
            levels,
            kind,
        });
        Ok(self.params.last().unwrap())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.params.iter()
    }

    /// Parameters feeding the input tensor, in insertion order.
    pub fn inputs(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.params.iter().filter(|p| p.kind.is_input())
    }

    /// Parameters present in the target tensor, in insertion order.
    pub fn outputs(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.params.iter().filter(|p| p.kind.is_output())
    }

    /// Flattened (parameter, level) channel layout of the input tensor.
    pub fn input_channels(&self) -> Vec<Channel> {
        Self::channels(self.inputs())
    }

    /// Flattened (parameter, level) channel layout of the target tensor.
    pub fn output_channels(&self) -> Vec<Channel> {
        Self::channels(self.outputs())
    }

    fn channels<'a>(params: impl Iterator<Item = &'a ParameterSpec>) -> Vec<Channel> {
        params
            .flat_map(|p| {
                p.levels.iter().map(|&level| Channel {
                    param: p.id.clone(),
                    level,
                })
            })
            .collect()
    }
}
