//! Trait matching between a request and a server.
//!
//! Traits cut both ways: a request naming a trait needs a server that
//! matches it, and a server advertising a trait is reserved for requests
//! that asked for it. A boolean `false` is equivalent to the trait being
//! absent on either side.

use nodegrid_core::{Image, Package, TraitValue, Traits, VmRequest};

/// The trait set a request demands: package traits, overlaid by image
/// traits, overlaid by VM traits.
pub fn requested_traits(vm: &VmRequest, image: &Image, package: Option<&Package>) -> Traits {
    let mut traits = package.map(|p| p.traits.clone()).unwrap_or_default();
    for (name, value) in &image.traits {
        traits.insert(name.clone(), value.clone());
    }
    for (name, value) in &vm.traits {
        traits.insert(name.clone(), value.clone());
    }
    traits
}

/// Whether two trait values are compatible. Scalars match by equality,
/// a scalar matches a list containing it, and two lists match when they
/// intersect.
fn values_match(a: &TraitValue, b: &TraitValue) -> bool {
    match (a, b) {
        (TraitValue::Bool(x), TraitValue::Bool(y)) => x == y,
        (TraitValue::Str(x), TraitValue::Str(y)) => x == y,
        (TraitValue::Str(x), TraitValue::List(l)) | (TraitValue::List(l), TraitValue::Str(x)) => {
            l.contains(x)
        }
        (TraitValue::List(x), TraitValue::List(y)) => x.iter().any(|v| y.contains(v)),
        (TraitValue::Bool(_), _) | (_, TraitValue::Bool(_)) => false,
    }
}

fn is_false(value: &TraitValue) -> bool {
    matches!(value, TraitValue::Bool(false))
}

/// Check a server's traits against the requested set. Returns the reason
/// the server does not qualify, if any.
pub fn match_traits(requested: &Traits, server: &Traits) -> Result<(), String> {
    for (name, want) in requested {
        match server.get(name) {
            Some(have) => {
                if !values_match(want, have) {
                    return Err(format!("server trait \"{name}\" does not match request"));
                }
            }
            None => {
                if !is_false(want) {
                    return Err(format!("server lacks trait \"{name}\""));
                }
            }
        }
    }

    // Servers with traits are dedicated; an unrequested trait
    // disqualifies the server.
    for (name, have) in server {
        if !requested.contains_key(name) && !is_false(have) {
            return Err(format!("server has unrequested trait \"{name}\""));
        }
    }

    Ok(())
}
