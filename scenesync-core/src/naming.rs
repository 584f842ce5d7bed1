//! Entity naming rule: `Name`, `Name.001`, `Name.002`, ...

/// Strip a trailing `.NNN` numeric suffix, if any.
///
/// `"Cube.001"` → `"Cube"`, `"Cube"` → `"Cube"`, `"v1.2a"` → `"v1.2a"`.
pub fn base_name(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((base, suffix))
            if !base.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => name,
    }
}

/// First `base.NNN` (from `.001` upward) for which `taken` returns false.
pub fn next_free_name(name: &str, mut taken: impl FnMut(&str) -> bool) -> String {
    let base = base_name(name);
    let mut n: u32 = 1;
    loop {
        let candidate = format!("{base}.{n:03}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// `name` itself when free, otherwise the next free suffixed variant.
pub fn unique_name(name: &str, mut taken: impl FnMut(&str) -> bool) -> String {
    if taken(name) {
        next_free_name(name, taken)
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("Cube"), "Cube");
        assert_eq!(base_name("Cube.001"), "Cube");
        assert_eq!(base_name("Cube.1234"), "Cube");
        assert_eq!(base_name("Cube.a01"), "Cube.a01");
        assert_eq!(base_name(".001"), ".001");
        assert_eq!(base_name("Cube."), "Cube.");
    }

    #[test]
    fn test_next_free_name_probes_in_order() {
        let taken: HashSet<&str> = ["Cube", "Cube.001"].into_iter().collect();
        assert_eq!(next_free_name("Cube", |n| taken.contains(n)), "Cube.002");
        assert_eq!(next_free_name("Cube.001", |n| taken.contains(n)), "Cube.002");
    }

    #[test]
    fn test_next_free_name_fills_gaps() {
        let taken: HashSet<&str> = ["Cube", "Cube.002"].into_iter().collect();
        assert_eq!(next_free_name("Cube", |n| taken.contains(n)), "Cube.001");
    }

    #[test]
    fn test_unique_name_keeps_free_name() {
        assert_eq!(unique_name("Torus", |_| false), "Torus");
        assert_eq!(unique_name("Torus", |n| n == "Torus"), "Torus.001");
    }

    #[test]
    fn test_suffix_grows_past_three_digits() {
        assert_eq!(next_free_name("Cone", |n| n != "Cone.1000" && n.len() <= 8), "Cone.1000");
    }
}
