//! Certificate path building via DFS path finding.
//!
//! Starting at the leaf, every issuer/subject match among the anchor and
//! the untrusted candidates is followed with backtracking. Each branch ends
//! either at the anchor (an anchored path) or at a certificate whose issuer
//! is nowhere in the inputs (an open path). All paths are returned so the
//! caller can classify them and pick the best one.

use super::checks::{signature_status, SignatureStatus};
use super::TrustStore;
use crate::handle::X509Handle;
use tracing::{debug, trace};

/// Default maximum number of issuers above the leaf.
pub(crate) const MAX_CHAIN_DEPTH: usize = 32;

/// Upper bound on recorded paths; cross-signed meshes stop exploring here.
pub(crate) const MAX_PATHS: usize = 64;

/// One candidate path, leaf first.
#[derive(Debug, Clone)]
pub(crate) struct ChainPath<'a> {
    pub(crate) certs: Vec<&'a X509Handle>,
    /// The last certificate is the trust anchor.
    pub(crate) anchored: bool,
    /// More than `max_depth` issuers sit above the leaf.
    pub(crate) depth_exceeded: bool,
}

impl<'a> ChainPath<'a> {
    pub(crate) fn top(&self) -> Option<&'a X509Handle> {
        self.certs.last().copied()
    }
}

struct PathSearch<'a, 'p> {
    pool: &'p [&'a X509Handle],
    anchor: Option<&'a X509Handle>,
    max_depth: usize,
    paths: Vec<ChainPath<'a>>,
}

/// Build every path from `leaf` through `candidates` toward the anchor.
///
/// Anchored paths come first in the result, each group in discovery order.
/// The result is never empty.
pub(crate) fn build_paths<'a>(
    leaf: &'a X509Handle,
    candidates: &[&'a X509Handle],
    trust_store: &'a TrustStore,
    max_depth: usize,
) -> Vec<ChainPath<'a>> {
    let anchor = trust_store.anchor();

    if let Some(anchor) = anchor.filter(|a| a.to_der() == leaf.to_der()) {
        return vec![ChainPath {
            certs: vec![anchor],
            anchored: true,
            depth_exceeded: false,
        }];
    }

    // Candidates identical to the anchor are the anchor; duplicates collapse.
    let mut pool: Vec<&'a X509Handle> = Vec::with_capacity(candidates.len());
    for &candidate in candidates {
        if trust_store.contains(candidate) || pool.iter().any(|c| c.to_der() == candidate.to_der())
        {
            continue;
        }
        pool.push(candidate);
    }

    let mut search = PathSearch {
        pool: &pool,
        anchor,
        max_depth,
        paths: Vec::new(),
    };
    let mut path = vec![leaf];
    search.extend(&mut path);

    let mut paths = search.paths;
    paths.sort_by_key(|p| !p.anchored);
    debug!(
        candidates = pool.len(),
        paths = paths.len(),
        anchored = paths.iter().filter(|p| p.anchored).count(),
        "built candidate paths"
    );
    paths
}

impl<'a, 'p> PathSearch<'a, 'p> {
    fn extend(&mut self, path: &mut Vec<&'a X509Handle>) {
        if self.paths.len() >= MAX_PATHS {
            return;
        }
        let Some(&current) = path.last() else {
            return;
        };
        if path.len() > self.max_depth + 1 {
            self.record(path, false);
            return;
        }

        let mut extended = false;

        // The anchor is tried first and must also hold the signing key.
        if let Some(anchor) = self.anchor.filter(|a| {
            current.names_as_issuer(a)
                && signature_status(current, a) == SignatureStatus::Valid
        }) {
            path.push(anchor);
            self.record(path, true);
            path.pop();
            extended = true;
        }

        let pool = self.pool;
        for &candidate in pool {
            if !current.names_as_issuer(candidate) {
                continue;
            }
            if path.iter().any(|c| c.to_der() == candidate.to_der()) {
                continue;
            }
            trace!(
                from = %current.subject(),
                to = %candidate.subject(),
                "following candidate issuer"
            );
            path.push(candidate);
            self.extend(path);
            path.pop();
            extended = true;
        }

        if !extended {
            self.record(path, false);
        }
    }

    fn record(&mut self, path: &[&'a X509Handle], anchored: bool) {
        if self.paths.len() >= MAX_PATHS {
            return;
        }
        self.paths.push(ChainPath {
            certs: path.to_vec(),
            anchored,
            depth_exceeded: path.len() > self.max_depth + 1,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};

    struct Ca {
        handle: X509Handle,
        cert: Certificate,
        key: KeyPair,
    }

    fn ca_params(cn: &str) -> CertificateParams {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
    }

    fn root(cn: &str) -> Ca {
        let params = ca_params(cn);
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Ca {
            handle: X509Handle::from_der(cert.der()).unwrap(),
            cert,
            key,
        }
    }

    fn issue(cn: &str, parent: &Ca) -> Ca {
        let params = ca_params(cn);
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &parent.cert, &parent.key).unwrap();
        Ca {
            handle: X509Handle::from_der(cert.der()).unwrap(),
            cert,
            key,
        }
    }

    #[test]
    fn finds_anchored_path_through_candidates() {
        let root = root("V2G Root");
        let sub = issue("CPO Sub-CA", &root);
        let leaf = issue("EVSE Leaf", &sub);
        let store = TrustStore::with_anchor(root.handle.clone());

        let paths = build_paths(&leaf.handle, &[&sub.handle], &store, MAX_CHAIN_DEPTH);
        let first = paths.first().unwrap();
        assert!(first.anchored);
        assert_eq!(first.certs.len(), 3);
        assert_eq!(first.top(), store.anchor());
    }

    #[test]
    fn anchor_with_wrong_key_gives_open_path() {
        let real = root("V2G Root");
        let impostor = root("V2G Root");
        let sub = issue("CPO Sub-CA", &real);
        let store = TrustStore::with_anchor(impostor.handle.clone());

        let paths = build_paths(&sub.handle, &[], &store, MAX_CHAIN_DEPTH);
        assert_eq!(paths.len(), 1);
        assert!(!paths.iter().any(|p| p.anchored));
    }

    #[test]
    fn leaf_equal_to_anchor_is_anchored() {
        let root = root("V2G Root");
        let store = TrustStore::with_anchor(root.handle.clone());
        let paths = build_paths(&root.handle, &[&root.handle], &store, MAX_CHAIN_DEPTH);
        assert_eq!(paths.len(), 1);
        assert!(paths.first().unwrap().anchored);
    }

    #[test]
    fn empty_store_gives_open_paths() {
        let root = root("V2G Root");
        let sub = issue("CPO Sub-CA", &root);
        let leaf = issue("EVSE Leaf", &sub);
        let store = TrustStore::empty();

        let paths = build_paths(&leaf.handle, &[&sub.handle], &store, MAX_CHAIN_DEPTH);
        assert_eq!(paths.len(), 1);
        assert!(!paths[0].anchored);
        assert_eq!(paths[0].certs.len(), 2);
    }

    #[test]
    fn issuer_names_link_across_string_encodings() {
        let root_key = KeyPair::generate().unwrap();
        let mut printable = ca_params("unused");
        printable.distinguished_name = rcgen::DistinguishedName::new();
        printable.distinguished_name.push(
            DnType::CommonName,
            rcgen::DnValue::PrintableString(rcgen::PrintableString::try_from("V2G Root").unwrap()),
        );
        let anchor_cert = printable.self_signed(&root_key).unwrap();
        let anchor = X509Handle::from_der(anchor_cert.der()).unwrap();

        // Same key, issuer name written as a lower-case UTF8String.
        let twin_cert = ca_params("v2g  root").self_signed(&root_key).unwrap();
        let leaf_key = KeyPair::generate().unwrap();
        let leaf_cert = ca_params("EVSE Leaf")
            .signed_by(&leaf_key, &twin_cert, &root_key)
            .unwrap();
        let leaf = X509Handle::from_der(leaf_cert.der()).unwrap();
        assert_ne!(leaf.issuer_raw, anchor.subject_raw);

        let store = TrustStore::with_anchor(anchor);
        let paths = build_paths(&leaf, &[], &store, MAX_CHAIN_DEPTH);
        assert!(paths[0].anchored);
        assert_eq!(paths[0].certs.len(), 2);
    }

    #[test]
    fn depth_limit_is_recorded() {
        let root = root("Root");
        let a = issue("A", &root);
        let b = issue("B", &a);
        let leaf = issue("Leaf", &b);
        let store = TrustStore::with_anchor(root.handle.clone());

        let paths = build_paths(&leaf.handle, &[&a.handle, &b.handle], &store, 1);
        assert!(paths.iter().all(|p| p.depth_exceeded));
        assert!(paths.iter().all(|p| !p.anchored));
    }
}
