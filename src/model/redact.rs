use crate::model::permissions::Permissions;

/// Strips money figures a caller is not allowed to see.
pub trait Redact {
    fn redact(&mut self, perms: &Permissions);
}

pub fn redact_all<T: Redact>(items: &mut [T], perms: &Permissions) {
    for item in items.iter_mut() {
        item.redact(perms);
    }
}

/// Applies redaction and hands the value back, for use in response expressions.
pub fn redacted<T: Redact>(mut item: T, perms: &Permissions) -> T {
    item.redact(perms);
    item
}
