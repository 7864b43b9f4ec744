//! Parser for ncnn's text `.param` format.
//!
//! ```text
//! 7767517
//! <layer_count> <blob_count>
//! <Type> <name> <n_bottom> <n_top> <bottom..> <top..> [id=value ..]
//! ```
//!
//! Values containing `.`, `e` or `E` are floats, everything else is an
//! integer.  Arrays are written with key `-23300 - id` as `n,v1,..,vn`.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use srmd_core::error::{EngineError, Result};

/// First line of every text param file.
pub const PARAM_MAGIC: u32 = 7_767_517;

/// Array keys are encoded as `ARRAY_KEY_BASE - id`.
const ARRAY_KEY_BASE: i32 = -23_300;

#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Int(i32),
    Float(f32),
    IntArray(Vec<i32>),
    FloatArray(Vec<f32>),
}

/// `id → value` pairs of one layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamDict {
    values: BTreeMap<i32, ParamValue>,
}

impl ParamDict {
    pub fn contains(&self, id: i32) -> bool {
        self.values.contains_key(&id)
    }

    /// Integer value for `id`, or `default` when absent.  A float value is an
    /// error.
    pub fn get_int(&self, id: i32, default: i32) -> std::result::Result<i32, String> {
        match self.values.get(&id) {
            None => Ok(default),
            Some(ParamValue::Int(v)) => Ok(*v),
            Some(other) => Err(format!("param {id} should be an integer, found {other:?}")),
        }
    }

    /// Float value for `id`; integer literals are widened.
    pub fn get_float(&self, id: i32, default: f32) -> std::result::Result<f32, String> {
        match self.values.get(&id) {
            None => Ok(default),
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f32),
            Some(other) => Err(format!("param {id} should be a scalar, found {other:?}")),
        }
    }

    /// Float array for `id` (empty when absent); integer arrays are widened.
    pub fn get_float_array(&self, id: i32) -> std::result::Result<Vec<f32>, String> {
        match self.values.get(&id) {
            None => Ok(Vec::new()),
            Some(ParamValue::FloatArray(v)) => Ok(v.clone()),
            Some(ParamValue::IntArray(v)) => Ok(v.iter().map(|&x| x as f32).collect()),
            Some(other) => Err(format!("param {id} should be an array, found {other:?}")),
        }
    }

    fn insert(&mut self, id: i32, value: ParamValue) {
        self.values.insert(id, value);
    }
}

/// One layer line.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamLayer {
    pub kind: String,
    pub name: String,
    pub bottoms: Vec<String>,
    pub tops: Vec<String>,
    pub params: ParamDict,
}

/// Whole parsed param file, layers in file order.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamGraph {
    pub layers: Vec<ParamLayer>,
    pub blob_count: usize,
}

/// Read and parse a `.param` file.
pub fn read_param(path: &Path) -> Result<ParamGraph> {
    if !path.is_file() {
        return Err(EngineError::ModelNotFound {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path)
        .map_err(|err| EngineError::parse(path, format!("not valid UTF-8 text: {err}")))?;
    parse_param(&text, path)
}

/// Parse param text; `path` is only used for error messages.
pub fn parse_param(text: &str, path: &Path) -> Result<ParamGraph> {
    let fail = |reason: String| EngineError::parse(path, reason);
    let mut lines = text
        .lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, line)| !line.is_empty());

    let (_, magic) = lines.next().ok_or_else(|| fail("empty param file".into()))?;
    if magic.parse::<u32>().ok() != Some(PARAM_MAGIC) {
        return Err(fail(format!(
            "bad magic '{magic}', expected {PARAM_MAGIC}"
        )));
    }

    let (_, counts) = lines
        .next()
        .ok_or_else(|| fail("missing layer/blob count line".into()))?;
    let counts: Vec<usize> = counts
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|err| fail(format!("invalid count line '{counts}': {err}")))?;
    let &[layer_count, blob_count] = counts.as_slice() else {
        return Err(fail(format!(
            "count line must hold 2 numbers, found {}",
            counts.len()
        )));
    };

    let mut layers = Vec::with_capacity(layer_count);
    for (line_no, line) in lines {
        let layer =
            parse_layer(line).map_err(|reason| fail(format!("line {}: {reason}", line_no + 1)))?;
        layers.push(layer);
    }

    if layers.len() != layer_count {
        return Err(fail(format!(
            "header declares {layer_count} layers, found {}",
            layers.len()
        )));
    }
    let blobs: HashSet<&str> = layers
        .iter()
        .flat_map(|l| l.tops.iter().map(String::as_str))
        .collect();
    if blobs.len() != blob_count {
        return Err(fail(format!(
            "header declares {blob_count} blobs, found {}",
            blobs.len()
        )));
    }

    Ok(ParamGraph { layers, blob_count })
}

fn parse_layer(line: &str) -> std::result::Result<ParamLayer, String> {
    let mut tokens = line.split_whitespace();
    let mut next = |what: &str| tokens.next().ok_or_else(|| format!("missing {what}"));

    let kind = next("layer type")?.to_string();
    let name = next("layer name")?.to_string();
    let n_bottom: usize = next("bottom count")?
        .parse()
        .map_err(|e| format!("bad bottom count: {e}"))?;
    let n_top: usize = next("top count")?
        .parse()
        .map_err(|e| format!("bad top count: {e}"))?;
    let bottoms = (0..n_bottom)
        .map(|_| next("bottom blob").map(str::to_string))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let tops = (0..n_top)
        .map(|_| next("top blob").map(str::to_string))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut params = ParamDict::default();
    for token in tokens {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| format!("expected id=value, found '{token}'"))?;
        let key: i32 = key.parse().map_err(|e| format!("bad param id '{key}': {e}"))?;
        if key <= ARRAY_KEY_BASE {
            params.insert(ARRAY_KEY_BASE - key, parse_array(value)?);
        } else {
            params.insert(key, parse_scalar(value)?);
        }
    }

    Ok(ParamLayer {
        kind,
        name,
        bottoms,
        tops,
        params,
    })
}

fn is_float_literal(s: &str) -> bool {
    s.contains(['.', 'e', 'E'])
}

fn parse_scalar(s: &str) -> std::result::Result<ParamValue, String> {
    if is_float_literal(s) {
        s.parse()
            .map(ParamValue::Float)
            .map_err(|e| format!("bad float '{s}': {e}"))
    } else {
        s.parse()
            .map(ParamValue::Int)
            .map_err(|e| format!("bad integer '{s}': {e}"))
    }
}

fn parse_array(s: &str) -> std::result::Result<ParamValue, String> {
    let mut items = s.split(',');
    let len: usize = items
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|e| format!("bad array length in '{s}': {e}"))?;
    let items: Vec<&str> = items.collect();
    if items.len() != len {
        return Err(format!(
            "array declares {len} elements, found {}",
            items.len()
        ));
    }
    if items.iter().any(|v| is_float_literal(v)) {
        items
            .iter()
            .map(|v| v.parse::<f32>().map_err(|e| format!("bad float '{v}': {e}")))
            .collect::<std::result::Result<_, _>>()
            .map(ParamValue::FloatArray)
    } else {
        items
            .iter()
            .map(|v| v.parse::<i32>().map_err(|e| format!("bad integer '{v}': {e}")))
            .collect::<std::result::Result<_, _>>()
            .map(ParamValue::IntArray)
    }
}
