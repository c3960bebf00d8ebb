// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor record to upload record mapping.
//!
//! Two static tables drive the mapping:
//! - `channels`: sensor unit id -> destination credential (write key)
//! - `fields`: measurement name -> destination field name (`field1`...)
//!
//! Both are loaded once at startup and never change afterwards.

use crate::record::{FieldValue, SensorRecord, UploadRecord, CREDENTIAL_KEY, ID_KEY};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Mapping table errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("channel '{0}' has an empty credential")]
    EmptyCredential(String),

    #[error("measurement '{0}' maps to an empty field name")]
    EmptyField(String),

    #[error("measurement '{0}' cannot be mapped to the reserved field 'key'")]
    ReservedField(String),

    #[error("'id' identifies the sensor unit and cannot be mapped as a measurement")]
    ReservedMeasurement,

    #[error("measurements '{first}' and '{second}' both map to '{field}'")]
    DuplicateField {
        field: String,
        first: String,
        second: String,
    },
}

/// Immutable id/credential and measurement/field tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMapping {
    /// Sensor unit id -> destination credential.
    pub channels: BTreeMap<String, String>,

    /// Measurement name -> destination field name.
    pub fields: BTreeMap<String, String>,
}

impl FieldMapping {
    /// Build and validate a mapping.
    pub fn new(
        channels: BTreeMap<String, String>,
        fields: BTreeMap<String, String>,
    ) -> Result<Self, MappingError> {
        let mapping = Self { channels, fields };
        mapping.validate()?;
        Ok(mapping)
    }

    /// Field table of the stock Lurker sensor board.
    pub fn default_fields() -> BTreeMap<String, String> {
        [
            ("air_temp", "field1"),
            ("surface_temp", "field2"),
            ("humidity", "field3"),
            ("illuminance", "field4"),
            ("noise_level", "field5"),
            ("motion", "field6"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    /// Check that every destination field is written at most once per record
    /// and never clobbers the credential.
    pub fn validate(&self) -> Result<(), MappingError> {
        for (id, credential) in &self.channels {
            if credential.trim().is_empty() {
                return Err(MappingError::EmptyCredential(id.clone()));
            }
        }

        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (measurement, field) in &self.fields {
            if measurement == ID_KEY {
                return Err(MappingError::ReservedMeasurement);
            }
            if field.trim().is_empty() {
                return Err(MappingError::EmptyField(measurement.clone()));
            }
            if field == CREDENTIAL_KEY {
                return Err(MappingError::ReservedField(measurement.clone()));
            }
            if let Some(first) = seen.insert(field.as_str(), measurement.as_str()) {
                return Err(MappingError::DuplicateField {
                    field: field.clone(),
                    first: first.to_string(),
                    second: measurement.clone(),
                });
            }
        }

        Ok(())
    }

    /// Credential for a sensor unit id.
    pub fn credential(&self, id: &str) -> Option<&str> {
        self.channels.get(id).map(String::as_str)
    }

    /// Destination field for a measurement name.
    pub fn destination(&self, measurement: &str) -> Option<&str> {
        self.fields.get(measurement).map(String::as_str)
    }
}

/// Maps sensor records onto the upload schema.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    mapping: Arc<FieldMapping>,
}

impl FieldMapper {
    /// Create a mapper over a fixed mapping.
    pub fn new(mapping: FieldMapping) -> Self {
        Self {
            mapping: Arc::new(mapping),
        }
    }

    /// The mapping tables in use.
    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    /// Map a sensor record.
    ///
    /// Returns an empty record when the id is missing, not a string, or has
    /// no configured credential; callers must not forward empty records.
    /// Measurements without a destination field are dropped, as are values
    /// with no scalar representation (null, arrays, objects).
    pub fn map(&self, record: &SensorRecord) -> UploadRecord {
        let mut output = UploadRecord::new();

        let credential = match record.id().and_then(|id| self.mapping.credential(id)) {
            Some(c) => c,
            None => return output,
        };
        output.insert(CREDENTIAL_KEY, FieldValue::String(credential.to_string()));

        for (name, value) in record.iter() {
            if name == ID_KEY {
                continue;
            }
            let Some(field) = self.mapping.destination(name) else {
                continue;
            };
            match FieldValue::from_json(value) {
                Some(v) => {
                    output.insert(field, v);
                }
                None => {
                    tracing::debug!(measurement = %name, "Skipping non-scalar value");
                }
            }
        }

        output
    }
}
