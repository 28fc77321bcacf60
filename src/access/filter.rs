use crate::api::Device;
use crate::identity::{Actor, DeviceScope};

/// Whether `actor` may see `device`.
///
/// The Admin rule includes unaffiliated devices. An older variant of the
/// dashboard left that clause out; this is the superset.
pub fn is_visible(device: &Device, actor: &Actor) -> bool {
    let owned = match (device.owner_identity.as_deref(), actor.user_name()) {
        (Some(owner), Some(me)) => owner == me,
        _ => false,
    };
    let same_organization = actor
        .organization()
        .map(|org| device.organization == org)
        .unwrap_or(false);

    match actor.device_scope() {
        DeviceScope::Fleet => true,
        DeviceScope::OrganizationAndUnaffiliated => {
            same_organization || device.organization.is_empty() || owned
        }
        DeviceScope::OwnedAndOrganization => owned || same_organization,
        DeviceScope::Nothing => false,
    }
}

/// Keep the devices `actor` may see, preserving input order.
pub fn filter_visible(devices: &[Device], actor: &Actor) -> Vec<Device> {
    devices
        .iter()
        .filter(|device| is_visible(device, actor))
        .cloned()
        .collect()
}
