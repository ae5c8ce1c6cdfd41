// crates/tally-plugin/src/metric.rs
// ============================================================================
// Module: Plugin Metric Types
// Description: Metric descriptors exchanged between control and plugins.
// Purpose: Carry namespace, version, per-metric config, and collected data.
// Dependencies: bytes, serde, tally-policy
// ============================================================================

//! ## Overview
//! A [`PluginMetricType`] names a metric by namespace path and version. The
//! control process sends descriptors (optionally with a processed config map)
//! to `CollectMetrics`; the plugin returns them with [`MetricData`],
//! a source label, and a collection timestamp filled in.

// ============================================================================
// SECTION: Imports
// ============================================================================

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use serde::Deserialize;
use serde::Serialize;
use tally_policy::CodecError;
use tally_policy::ConfigMap;
use tally_policy::WireDecode;
use tally_policy::WireEncode;
use tally_policy::wire::bounded_capacity;
use tally_policy::wire::get_bool;
use tally_policy::wire::get_f64;
use tally_policy::wire::get_i64;
use tally_policy::wire::get_len;
use tally_policy::wire::get_optional;
use tally_policy::wire::get_string;
use tally_policy::wire::get_u8;
use tally_policy::wire::get_u64;
use tally_policy::wire::put_bool;
use tally_policy::wire::put_len;
use tally_policy::wire::put_optional;
use tally_policy::wire::put_str;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Wire tag for [`MetricData::Int`].
const DATA_TAG_INT: u8 = 1;
/// Wire tag for [`MetricData::Float`].
const DATA_TAG_FLOAT: u8 = 2;
/// Wire tag for [`MetricData::Str`].
const DATA_TAG_STR: u8 = 3;
/// Wire tag for [`MetricData::Bool`].
const DATA_TAG_BOOL: u8 = 4;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Collected metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetricData {
    /// Integer sample.
    Int(i64),
    /// Floating-point sample.
    Float(f64),
    /// Textual sample.
    Str(String),
    /// Boolean sample.
    Bool(bool),
}

/// Metric descriptor, optionally carrying config and collected data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetricType {
    /// Namespace path segments.
    pub namespace: Vec<String>,
    /// Metric version.
    pub version: i64,
    /// When the plugin last advertised this metric (ms since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_advertised_ms: Option<u64>,
    /// Processed config for this metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigMap>,
    /// Collected value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<MetricData>,
    /// Host or source label of the collected value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Collection time (ms since epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
}

impl PluginMetricType {
    /// Creates a bare descriptor.
    #[must_use]
    pub fn new<S: Into<String>>(namespace: impl IntoIterator<Item = S>, version: i64) -> Self {
        Self {
            namespace: namespace.into_iter().map(Into::into).collect(),
            version,
            last_advertised_ms: None,
            config: None,
            data: None,
            source: None,
            timestamp_ms: None,
        }
    }

    /// Returns the namespace joined with `/`.
    #[must_use]
    pub fn namespace_key(&self) -> String {
        self.namespace.join("/")
    }

    /// Sets the config map.
    #[must_use]
    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the collected value, source, and timestamp.
    #[must_use]
    pub fn with_data(
        mut self,
        data: MetricData,
        source: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        self.data = Some(data);
        self.source = Some(source.into());
        self.timestamp_ms = Some(timestamp_ms);
        self
    }
}

// ============================================================================
// SECTION: Wire Codec
// ============================================================================

impl WireEncode for MetricData {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Int(value) => {
                buf.put_u8(DATA_TAG_INT);
                buf.put_i64(*value);
            }
            Self::Float(value) => {
                buf.put_u8(DATA_TAG_FLOAT);
                buf.put_f64(*value);
            }
            Self::Str(value) => {
                buf.put_u8(DATA_TAG_STR);
                put_str(buf, value);
            }
            Self::Bool(value) => {
                buf.put_u8(DATA_TAG_BOOL);
                put_bool(buf, *value);
            }
        }
    }
}

impl WireDecode for MetricData {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        match get_u8(buf)? {
            DATA_TAG_INT => Ok(Self::Int(get_i64(buf)?)),
            DATA_TAG_FLOAT => Ok(Self::Float(get_f64(buf)?)),
            DATA_TAG_STR => Ok(Self::Str(get_string(buf)?)),
            DATA_TAG_BOOL => Ok(Self::Bool(get_bool(buf)?)),
            other => Err(CodecError::Invalid(format!("unknown metric data tag: {other}"))),
        }
    }
}

impl WireEncode for PluginMetricType {
    fn encode(&self, buf: &mut BytesMut) {
        put_len(buf, self.namespace.len());
        for segment in &self.namespace {
            put_str(buf, segment);
        }
        buf.put_i64(self.version);
        put_optional(buf, self.last_advertised_ms, BytesMut::put_u64);
        put_optional(buf, self.config.as_ref(), |buf, config| config.encode(buf));
        put_optional(buf, self.data.as_ref(), |buf, data| data.encode(buf));
        put_optional(buf, self.source.as_deref(), put_str);
        put_optional(buf, self.timestamp_ms, BytesMut::put_u64);
    }
}

impl WireDecode for PluginMetricType {
    fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let len = get_len(buf, 4)?;
        let mut namespace = Vec::with_capacity(bounded_capacity::<String>(len, buf));
        for _ in 0..len {
            namespace.push(get_string(buf)?);
        }
        let version = get_i64(buf)?;
        let last_advertised_ms = get_optional(buf, get_u64)?;
        let config = get_optional(buf, ConfigMap::decode)?;
        let data = get_optional(buf, MetricData::decode)?;
        let source = get_optional(buf, get_string)?;
        let timestamp_ms = get_optional(buf, get_u64)?;
        Ok(Self {
            namespace,
            version,
            last_advertised_ms,
            config,
            data,
            source,
            timestamp_ms,
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
