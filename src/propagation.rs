//! Change propagation from templates and venues to scheduled instances.
//!
//! Instances carry denormalized snapshots of their template and venue.
//! When the source entity is edited, a pure predicate decides whether any
//! snapshotted field changed; if so the engine patches every still-
//! `scheduled` instance in the same operation as the edit. Terminal
//! instances keep their historical snapshot, and bookings are never
//! touched.

use crate::Credits;
use crate::model::{
    BookingWindow, DiscountRule, RefundPolicy, Template, TemplateSnapshot, Venue, VenueSnapshot,
};

/// Partial edit to a template. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct TemplateUpdate {
    pub name: Option<String>,
    pub duration_mins: Option<u32>,
    pub capacity: Option<u32>,
    pub price: Option<Option<Credits>>,
    pub discount_rules: Option<Vec<DiscountRule>>,
    pub requires_approval: Option<bool>,
    pub booking_window: Option<Option<BookingWindow>>,
    pub cancellation_window_hours: Option<Option<i64>>,
    pub refund_inside_window: Option<RefundPolicy>,
}

impl TemplateUpdate {
    pub fn apply(&self, template: &mut Template) {
        if let Some(name) = &self.name {
            template.name = name.clone();
        }
        if let Some(duration) = self.duration_mins {
            template.duration_mins = duration;
        }
        if let Some(capacity) = self.capacity {
            template.capacity = capacity;
        }
        if let Some(price) = self.price {
            template.price = price;
        }
        if let Some(rules) = &self.discount_rules {
            template.discount_rules = rules.clone();
        }
        if let Some(requires_approval) = self.requires_approval {
            template.requires_approval = requires_approval;
        }
        if let Some(window) = self.booking_window {
            template.booking_window = window;
        }
        if let Some(hours) = self.cancellation_window_hours {
            template.cancellation_window_hours = hours;
        }
        if let Some(policy) = self.refund_inside_window {
            template.refund_inside_window = policy;
        }
    }
}

/// Partial edit to a venue. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct VenueUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
}

impl VenueUpdate {
    pub fn apply(&self, venue: &mut Venue) {
        if let Some(name) = &self.name {
            venue.name = name.clone();
        }
        if let Some(address) = &self.address {
            venue.address = address.clone();
        }
    }
}

/// Whether a template edit touched any field snapshotted onto instances.
pub fn template_change_affects_snapshots(old: &Template, new: &Template) -> bool {
    old.name != new.name
        || old.duration_mins != new.duration_mins
        || old.price != new.price
        || old.discount_rules != new.discount_rules
}

/// Whether a venue edit touched any field snapshotted onto instances.
pub fn venue_change_affects_snapshots(old: &Venue, new: &Venue) -> bool {
    old.name != new.name || old.address != new.address
}

/// Snapshot taken when an instance is generated from a template.
pub fn snapshot_template(template: &Template) -> TemplateSnapshot {
    TemplateSnapshot {
        name: template.name.clone(),
        duration_mins: template.duration_mins,
        price: template.price,
    }
}

/// Snapshot taken when an instance is generated at a venue.
pub fn snapshot_venue(venue: &Venue) -> VenueSnapshot {
    VenueSnapshot {
        name: venue.name.clone(),
        address: venue.address.clone(),
    }
}

/// Bring an instance's template snapshot back in sync with its source.
pub fn patch_template_snapshot(snapshot: &mut TemplateSnapshot, template: &Template) {
    snapshot.name = template.name.clone();
    snapshot.duration_mins = template.duration_mins;
    snapshot.price = template.price;
}

/// Bring an instance's venue snapshot back in sync with its source.
pub fn patch_venue_snapshot(snapshot: &mut VenueSnapshot, venue: &Venue) {
    snapshot.name = venue.name.clone();
    snapshot.address = venue.address.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DiscountCondition;

    fn template() -> Template {
        Template {
            id: 1,
            business: 1,
            name: "Morning Yoga".to_string(),
            duration_mins: 60,
            capacity: 10,
            price: Some(Credits::from_minor(1500)),
            discount_rules: Vec::new(),
            requires_approval: false,
            booking_window: None,
            cancellation_window_hours: None,
            refund_inside_window: RefundPolicy::Full,
        }
    }

    fn venue() -> Venue {
        Venue {
            id: 1,
            name: "Studio A".to_string(),
            address: "1 Main St".to_string(),
            coords: None,
        }
    }

    #[test]
    fn name_edit_affects_snapshots() {
        let old = template();
        let mut new = old.clone();
        TemplateUpdate {
            name: Some("Evening Yoga".to_string()),
            ..Default::default()
        }
        .apply(&mut new);

        assert!(template_change_affects_snapshots(&old, &new));
        assert_eq!(new.name, "Evening Yoga");
    }

    #[test]
    fn approval_edit_does_not_affect_snapshots() {
        let old = template();
        let mut new = old.clone();
        TemplateUpdate {
            requires_approval: Some(true),
            capacity: Some(20),
            ..Default::default()
        }
        .apply(&mut new);

        assert!(!template_change_affects_snapshots(&old, &new));
    }

    #[test]
    fn discount_rule_edit_affects_snapshots() {
        let old = template();
        let mut new = old.clone();
        new.discount_rules.push(DiscountRule {
            id: 1,
            name: "early bird".to_string(),
            condition: DiscountCondition::HoursBeforeMin(48),
            amount: Credits::from_minor(150),
        });
        assert!(template_change_affects_snapshots(&old, &new));
    }

    #[test]
    fn patch_template_snapshot_syncs_all_fields() {
        let mut snapshot = TemplateSnapshot {
            name: "stale".to_string(),
            duration_mins: 30,
            price: None,
        };
        patch_template_snapshot(&mut snapshot, &template());
        assert_eq!(snapshot.name, "Morning Yoga");
        assert_eq!(snapshot.duration_mins, 60);
        assert_eq!(snapshot.price, Some(Credits::from_minor(1500)));
    }

    #[test]
    fn venue_address_edit_affects_snapshots() {
        let old = venue();
        let mut new = old.clone();
        VenueUpdate {
            address: Some("2 Side St".to_string()),
            ..Default::default()
        }
        .apply(&mut new);

        assert!(venue_change_affects_snapshots(&old, &new));

        let mut snapshot = VenueSnapshot {
            name: old.name.clone(),
            address: old.address.clone(),
        };
        patch_venue_snapshot(&mut snapshot, &new);
        assert_eq!(snapshot.address, "2 Side St");
    }

    #[test]
    fn coords_change_does_not_affect_snapshots() {
        let old = venue();
        let mut new = old.clone();
        new.coords = Some((48.85, 2.35));
        assert!(!venue_change_affects_snapshots(&old, &new));
    }
}
