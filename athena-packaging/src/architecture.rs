// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Architecture name matching.

Architecture fields and restriction lists can name a concrete machine
architecture (`amd64`), the wildcards `any` / `all`, or an os-qualified
wildcard in the `os-cpu` form (`linux-any`, `any-amd64`).
*/

/// Whether an architecture pattern is compatible with a target architecture.
///
/// The target is always a bare machine architecture such as `amd64`. A
/// pattern of `all` matches because architecture-independent content is
/// installable everywhere.
pub fn arch_matches(pattern: &str, target: &str) -> bool {
    if pattern == target || pattern == "any" || pattern == "all" {
        return true;
    }

    // os-cpu wildcard pairs. Bare targets imply a linux os component.
    if let Some((os, cpu)) = pattern.split_once('-') {
        let os_ok = os == "any" || os == "linux";
        let cpu_ok = cpu == "any" || cpu == target;

        return os_ok && cpu_ok;
    }

    false
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wildcards() {
        assert!(arch_matches("amd64", "amd64"));
        assert!(arch_matches("any", "amd64"));
        assert!(arch_matches("all", "amd64"));
        assert!(arch_matches("linux-any", "amd64"));
        assert!(arch_matches("any-amd64", "amd64"));

        assert!(!arch_matches("arm64", "amd64"));
        assert!(!arch_matches("kfreebsd-amd64", "amd64"));
        assert!(!arch_matches("linux-arm64", "amd64"));
    }
}
