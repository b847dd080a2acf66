/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::{Context, anyhow};
use humanize_rs::bytes::Bytes;
use yaml_rust::{Yaml, yaml};

use crate::{CaptureConfig, ChildRelayConfig};

fn normalize_key(raw: &str) -> String {
    raw.to_lowercase().replace('-', "_")
}

fn foreach_kv<F>(table: &yaml::Hash, mut f: F) -> anyhow::Result<()>
where
    F: FnMut(&str, &Yaml) -> anyhow::Result<()>,
{
    for (k, v) in table.iter() {
        if let Yaml::String(key) = k {
            f(key, v).context(format!("failed to parse value of key {key}"))?;
        } else {
            return Err(anyhow!("key in hash should be string"));
        }
    }
    Ok(())
}

fn as_humanize_usize(v: &Yaml) -> anyhow::Result<usize> {
    match v {
        Yaml::String(value) => {
            let v = value.parse::<Bytes>()?;
            Ok(v.size())
        }
        Yaml::Integer(value) => Ok(usize::try_from(*value)?),
        _ => Err(anyhow!(
            "yaml value type for humanize usize should be 'string' or 'integer'"
        )),
    }
}

/// Parse a capture config, either as a single size value or as a map.
pub fn as_capture_config(value: &Yaml) -> anyhow::Result<CaptureConfig> {
    let mut config = CaptureConfig::default();

    match value {
        Yaml::Integer(_) | Yaml::String(_) => {
            let size = as_humanize_usize(value).context("invalid single humanize usize value")?;
            config.set_max_size(size);
        }
        Yaml::Hash(map) => {
            foreach_kv(map, |k, v| match normalize_key(k).as_str() {
                "max_size" | "size" => {
                    let size = as_humanize_usize(v)
                        .context(format!("invalid humanize usize value for key {k}"))?;
                    config.set_max_size(size);
                    Ok(())
                }
                _ => Err(anyhow!("invalid key {k}")),
            })?;
        }
        _ => return Err(anyhow!("invalid yaml value: {:?}", value)),
    }

    Ok(config)
}

pub fn as_child_relay_config(value: &Yaml) -> anyhow::Result<ChildRelayConfig> {
    let mut config = ChildRelayConfig::default();

    match value {
        Yaml::Integer(_) | Yaml::String(_) => {
            let size = as_humanize_usize(value).context("invalid single humanize usize value")?;
            config.set_buffer_size(size);
        }
        Yaml::Hash(map) => {
            foreach_kv(map, |k, v| match normalize_key(k).as_str() {
                "buffer_size" | "buffer" => {
                    let size = as_humanize_usize(v)
                        .context(format!("invalid humanize usize value for key {k}"))?;
                    config.set_buffer_size(size);
                    Ok(())
                }
                _ => Err(anyhow!("invalid key {k}")),
            })?;
        }
        _ => return Err(anyhow!("invalid yaml value: {:?}", value)),
    }

    Ok(config)
}
