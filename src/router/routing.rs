// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Static routing rules: which store owns a `(category, subcategory)`.
//!
//! A subcategory rule is consulted first, then the category set. Anything
//! unmatched stays local.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::capability::EntityKind;

pub mod categories {
    pub const DEMOGRAPHICS: &str = "DEMOGRAPHICS";
    pub const SETTINGS: &str = "SETTINGS";
    pub const MEDICAL_TIMELINE: &str = "MEDICAL_TIMELINE";
    pub const MEDICAL_PROVIDERS: &str = "MEDICAL_PROVIDERS";
    pub const MEDICAL_APPOINTMENTS: &str = "MEDICAL_APPOINTMENTS";
    pub const MEDICAL_DOCUMENTS: &str = "MEDICAL_DOCUMENTS";
}

pub mod subcategories {
    pub const MEDICAL_EVENTS: &str = "medical-events";
    pub const PROVIDERS: &str = "providers";
    pub const APPOINTMENTS: &str = "appointments";
    pub const DEMOGRAPHICS: &str = "demographics";
    pub const SETTINGS: &str = "settings";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StoreTarget {
    Local,
    Capability,
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    subcategories: HashMap<String, StoreTarget>,
    capability_categories: HashSet<String>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        let subcategories = [
            (subcategories::MEDICAL_EVENTS, StoreTarget::Capability),
            (subcategories::PROVIDERS, StoreTarget::Capability),
            (subcategories::APPOINTMENTS, StoreTarget::Capability),
            (subcategories::DEMOGRAPHICS, StoreTarget::Local),
            (subcategories::SETTINGS, StoreTarget::Local),
        ]
        .into_iter()
        .map(|(name, target)| (name.to_string(), target))
        .collect();

        let capability_categories = [
            categories::MEDICAL_TIMELINE,
            categories::MEDICAL_PROVIDERS,
            categories::MEDICAL_APPOINTMENTS,
            categories::MEDICAL_DOCUMENTS,
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        Self {
            subcategories,
            capability_categories,
        }
    }
}

impl RoutingTable {
    pub fn target(&self, category: &str, subcategory: Option<&str>) -> StoreTarget {
        let by_subcategory = subcategory.and_then(|s| self.subcategories.get(s));
        if by_subcategory == Some(&StoreTarget::Capability)
            || self.capability_categories.contains(category)
        {
            StoreTarget::Capability
        } else {
            StoreTarget::Local
        }
    }
}

/// Entity kind for a record headed to the higher-capability store.
pub fn entity_kind(category: &str, subcategory: &str) -> EntityKind {
    match (category, subcategory) {
        (_, subcategories::MEDICAL_EVENTS) | (categories::MEDICAL_TIMELINE, _) => {
            EntityKind::MedicalEvent
        }
        (_, subcategories::PROVIDERS) | (categories::MEDICAL_PROVIDERS, _) => EntityKind::Provider,
        (_, subcategories::APPOINTMENTS) | (categories::MEDICAL_APPOINTMENTS, _) => {
            EntityKind::Appointment
        }
        _ => EntityKind::GenericRecord,
    }
}
