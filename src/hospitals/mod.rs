//! Hospital collectors and their registry
//!
//! This module provides:
//! - The `Collector` contract shared by every source
//! - The `Registry` binding each `SourceId` to its collector
//! - One module per publishing organization (a page or API may
//!   serve several emergency departments)
//!
//! All source-specific logic must live in the family modules.
//! The rest of the application must interact exclusively through
//! the `Collector` trait and the `Registry`.

pub mod adapter;
pub mod codes;
pub mod registry;

pub mod ao_papardo;
pub mod arnas_civico;
pub mod asp_agrigento;
pub mod asp_caltanissetta;
pub mod asp_palermo;
pub mod ospedali_riuniti;
pub mod policlinico_catania;
pub mod policlinico_messina;
pub mod policlinico_palermo;

use chrono::{DateTime, Utc};

use crate::error::{ExtractionError, RegistryError};
use crate::schema::{ColorDistribution, Reading};
use codes::SourceId;
use registry::Registry;

/// Minutes added per waiting patient by sources that publish counts
/// but no wait time.
pub const ESTIMATED_MINUTES_PER_PATIENT: i64 = 30;

pub(crate) fn estimate_wait_minutes(patients_waiting: i64) -> i64 {
    patients_waiting.max(0).saturating_mul(ESTIMATED_MINUTES_PER_PATIENT)
}

/// Reading of a department that publishes patient counts only.
///
/// - color: most critical waiting color
/// - wait: per-patient estimate over the waiting patients
/// - beds: `capacity` minus everyone in the department, floored at 0
/// - distribution: waiting plus every `in_care` group
///
/// Counts outside the `i64` range are extraction errors.
pub(crate) fn census_reading(
    source: SourceId,
    retrieved_at: DateTime<Utc>,
    waiting: ColorDistribution,
    in_care: &[ColorDistribution],
    capacity: i64,
) -> Result<Reading, ExtractionError> {
    let everyone = in_care
        .iter()
        .try_fold(waiting, |acc, group| acc.merged(group))
        .map_err(|_| ExtractionError::overflow(source, "patients"))?;
    let waiting_total = waiting
        .total()
        .map_err(|_| ExtractionError::overflow(source, "in attesa"))?;
    let beds = everyone
        .total()
        .ok()
        .and_then(|n| capacity.checked_sub(n))
        .ok_or_else(|| ExtractionError::overflow(source, "available beds"))?;

    let mut reading = Reading::new(source, retrieved_at);
    reading.color = waiting.most_critical();
    reading.patients_waiting = Some(waiting_total);
    reading.waiting_minutes = Some(estimate_wait_minutes(waiting_total));
    reading.available_beds = beds.max(0);
    reading.color_distribution = Some(everyone);
    Ok(reading)
}

/// Registers every supported source.
///
/// CONTRACT:
/// - Called once at startup, before the registry is frozen
/// - Fails on the first duplicate or mismatched identity
///
pub fn register_all(registry: &mut Registry) -> Result<(), RegistryError> {
    ospedali_riuniti::register(registry)?;
    policlinico_palermo::register(registry)?;
    asp_agrigento::register(registry)?;
    asp_caltanissetta::register(registry)?;
    asp_palermo::register(registry)?;
    arnas_civico::register(registry)?;
    policlinico_catania::register(registry)?;
    ao_papardo::register(registry)?;
    policlinico_messina::register(registry)?;

    log::info!("{} collectors registered", registry.len());
    Ok(())
}
