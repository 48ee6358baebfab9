// src/deps/mod.rs

//! Dependency entries, sense flags, and version-aware matching
//!
//! Dependencies come in parallel header arrays (name, flags, version). The
//! flag word carries both the comparison bits (<, >, =) and, for trigger
//! entries, the lifecycle sense bits that say which phase the entry applies
//! to. Matching follows range-overlap semantics: a provide satisfies a
//! require when their version ranges intersect.

use crate::header::{Header, Tag};
use crate::version::Evr;
use bitflags::bitflags;
use std::cmp::Ordering;
use tracing::warn;

bitflags! {
    /// Comparison and lifecycle-sense bits of a dependency entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SenseFlags: u32 {
        const LESS           = 1 << 1;
        const GREATER        = 1 << 2;
        const EQUAL          = 1 << 3;

        const TRIGGER_IN     = 1 << 16;
        const TRIGGER_UN     = 1 << 17;
        const TRIGGER_POSTUN = 1 << 18;
        const TRIGGER_PREIN  = 1 << 25;

        /// Requirement on an engine feature rather than a package
        const LIB            = 1 << 24;
    }
}

impl SenseFlags {
    /// The comparison bits
    pub const COMPARE: SenseFlags = SenseFlags::LESS
        .union(SenseFlags::GREATER)
        .union(SenseFlags::EQUAL);

    /// All trigger sense bits
    pub const TRIGGER: SenseFlags = SenseFlags::TRIGGER_PREIN
        .union(SenseFlags::TRIGGER_IN)
        .union(SenseFlags::TRIGGER_UN)
        .union(SenseFlags::TRIGGER_POSTUN);
}

/// One dependency entry: name, flag word, optional version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub flags: SenseFlags,
    pub evr: Option<Evr>,
}

impl Dependency {
    pub fn new(name: impl Into<String>, flags: SenseFlags, evr: Option<Evr>) -> Self {
        Self {
            name: name.into(),
            flags,
            evr,
        }
    }

    /// Range-overlap check: does this entry (as a provide) satisfy `req`?
    ///
    /// Names must be equal. An entry without comparison bits or without a
    /// version on either side matches on name alone. With `no_promote`
    /// unset, a provide that carries an epoch satisfies an epochless
    /// requirement as if the requirement's epoch matched.
    pub fn overlaps(&self, req: &Dependency, no_promote: bool) -> bool {
        if self.name != req.name {
            return false;
        }
        if !self.flags.intersects(SenseFlags::COMPARE)
            || !req.flags.intersects(SenseFlags::COMPARE)
        {
            return true;
        }
        let (Some(prov_evr), Some(req_evr)) = (&self.evr, &req.evr) else {
            return true;
        };

        let sense = if !no_promote && req_evr.epoch == 0 && prov_evr.epoch > 0 {
            let demoted = Evr {
                epoch: 0,
                version: prov_evr.version.clone(),
                release: prov_evr.release.clone(),
            };
            demoted.compare(req_evr)
        } else {
            prov_evr.compare(req_evr)
        };

        match sense {
            Ordering::Less => {
                self.flags.contains(SenseFlags::GREATER)
                    || req.flags.contains(SenseFlags::LESS)
            }
            Ordering::Greater => {
                self.flags.contains(SenseFlags::LESS)
                    || req.flags.contains(SenseFlags::GREATER)
            }
            Ordering::Equal => {
                (self.flags.contains(SenseFlags::EQUAL) && req.flags.contains(SenseFlags::EQUAL))
                    || (self.flags.contains(SenseFlags::LESS)
                        && req.flags.contains(SenseFlags::LESS))
                    || (self.flags.contains(SenseFlags::GREATER)
                        && req.flags.contains(SenseFlags::GREATER))
            }
        }
    }
}

/// Build a dependency list from three parallel header arrays
fn from_arrays(
    header: &Header,
    names_tag: Tag,
    flags_tag: Tag,
    versions_tag: Tag,
) -> Vec<Dependency> {
    let Some(names) = header.get_str_vec(names_tag) else {
        return Vec::new();
    };
    let flags = header.get_u32_vec(flags_tag).unwrap_or(&[]);
    let versions = header.get_str_vec(versions_tag).unwrap_or(&[]);

    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let raw = flags.get(i).copied().unwrap_or(0);
            let evr = match versions.get(i).map(String::as_str) {
                None | Some("") => None,
                Some(v) => match Evr::parse(v) {
                    Ok(evr) => Some(evr),
                    Err(e) => {
                        warn!("ignoring unparseable version on dependency '{}': {}", name, e);
                        None
                    }
                },
            };
            Dependency::new(name.clone(), SenseFlags::from_bits_truncate(raw), evr)
        })
        .collect()
}

/// The header's trigger dependency entries, in array order
pub fn trigger_entries(header: &Header) -> Vec<Dependency> {
    from_arrays(
        header,
        Tag::TriggerNames,
        Tag::TriggerFlags,
        Tag::TriggerVersions,
    )
}

/// The header's requires triples
pub fn requires(header: &Header) -> Vec<Dependency> {
    from_arrays(
        header,
        Tag::RequireNames,
        Tag::RequireFlags,
        Tag::RequireVersions,
    )
}

/// The header's provides triples, plus the implicit name = EVR self-provide
pub fn provides(header: &Header) -> Vec<Dependency> {
    let mut list = from_arrays(
        header,
        Tag::ProvideNames,
        Tag::ProvideFlags,
        Tag::ProvideVersions,
    );
    if !header.name().is_empty() {
        list.push(Dependency::new(
            header.name(),
            SenseFlags::EQUAL,
            Some(header.evr()),
        ));
    }
    list
}

/// Does anything `source` provides satisfy `dep`?
pub fn any_provides(source: &Header, dep: &Dependency, no_promote: bool) -> bool {
    provides(source).iter().any(|p| p.overlaps(dep, no_promote))
}

/// Version stamped on the engine feature set
const FEATURE_VERSION: &str = "1.0";

/// Built-in capabilities a package may require via `LIB`-flagged entries
pub fn engine_features() -> Vec<Dependency> {
    let evr = Evr {
        epoch: 0,
        version: FEATURE_VERSION.to_string(),
        release: None,
    };
    [
        "stagehand(HeaderIsCbor)",
        "stagehand(PayloadIsTar)",
        "stagehand(ShellScriptlets)",
        "stagehand(TriggerSenses)",
    ]
    .into_iter()
    .map(|name| Dependency::new(name, SenseFlags::EQUAL, Some(evr.clone())))
    .collect()
}

/// Does any entry of `available` satisfy `req`?
pub fn satisfies(available: &[Dependency], req: &Dependency) -> bool {
    available.iter().any(|p| p.overlaps(req, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(name: &str, flags: SenseFlags, evr: &str) -> Dependency {
        let evr = if evr.is_empty() {
            None
        } else {
            Some(Evr::parse(evr).unwrap())
        };
        Dependency::new(name, flags, evr)
    }

    #[test]
    fn test_name_mismatch_never_overlaps() {
        let p = dep("a", SenseFlags::EQUAL, "1.0");
        let r = dep("b", SenseFlags::EQUAL, "1.0");
        assert!(!p.overlaps(&r, true));
    }

    #[test]
    fn test_versionless_matches_on_name() {
        let p = dep("a", SenseFlags::empty(), "");
        let r = dep("a", SenseFlags::GREATER | SenseFlags::EQUAL, "2.0");
        assert!(p.overlaps(&r, true));
    }

    #[test]
    fn test_range_overlap() {
        // provide a = 1.5 against require a >= 1.0
        let p = dep("a", SenseFlags::EQUAL, "1.5");
        let r = dep("a", SenseFlags::GREATER | SenseFlags::EQUAL, "1.0");
        assert!(p.overlaps(&r, true));

        // provide a = 0.9 against require a >= 1.0
        let p = dep("a", SenseFlags::EQUAL, "0.9");
        assert!(!p.overlaps(&r, true));

        // provide a = 1.0 against require a < 1.0
        let p = dep("a", SenseFlags::EQUAL, "1.0");
        let r = dep("a", SenseFlags::LESS, "1.0");
        assert!(!p.overlaps(&r, true));
    }

    #[test]
    fn test_epoch_promotion() {
        let p = dep("a", SenseFlags::EQUAL, "2:1.0");
        let r = dep("a", SenseFlags::EQUAL, "1.0");
        assert!(!p.overlaps(&r, true));
        assert!(p.overlaps(&r, false));
    }

    #[test]
    fn test_self_provide() {
        let mut h = Header::new();
        h.put_str(Tag::Name, "pkg");
        h.put_str(Tag::Version, "3.1");
        h.put_str(Tag::Release, "2");
        let r = dep("pkg", SenseFlags::GREATER | SenseFlags::EQUAL, "3.0");
        assert!(any_provides(&h, &r, true));
        let r = dep("pkg", SenseFlags::LESS, "3.0");
        assert!(!any_provides(&h, &r, true));
    }

    #[test]
    fn test_explicit_provides_consulted() {
        let mut h = Header::new();
        h.put_str(Tag::Name, "pkg");
        h.put_str(Tag::Version, "1.0");
        h.put_str_vec(Tag::ProvideNames, vec!["virt".into()]);
        h.put_u32_vec(Tag::ProvideFlags, vec![SenseFlags::EQUAL.bits()]);
        h.put_str_vec(Tag::ProvideVersions, vec!["9.0".into()]);
        let r = dep("virt", SenseFlags::GREATER, "5.0");
        assert!(any_provides(&h, &r, true));
    }

    #[test]
    fn test_trigger_entries_parallel_arrays() {
        let mut h = Header::new();
        h.put_str_vec(Tag::TriggerNames, vec!["dep1".into(), "dep2".into()]);
        h.put_u32_vec(
            Tag::TriggerFlags,
            vec![SenseFlags::TRIGGER_IN.bits(), SenseFlags::TRIGGER_UN.bits()],
        );
        h.put_str_vec(Tag::TriggerVersions, vec![String::new(), "1.0".into()]);

        let entries = trigger_entries(&h);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].flags.contains(SenseFlags::TRIGGER_IN));
        assert_eq!(entries[0].evr, None);
        assert_eq!(entries[1].evr, Some(Evr::parse("1.0").unwrap()));
    }

    #[test]
    fn test_engine_features_satisfy_lib_requires() {
        let features = engine_features();
        let req = dep(
            "stagehand(PayloadIsTar)",
            SenseFlags::LIB | SenseFlags::LESS | SenseFlags::EQUAL,
            "2.0",
        );
        assert!(satisfies(&features, &req));
        let missing = dep("stagehand(Quantum)", SenseFlags::LIB, "");
        assert!(!satisfies(&features, &missing));
    }
}
