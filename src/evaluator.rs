//! Selector evaluation: ranked candidates tried against one scope.
//!
//! Candidates run strictly in descending score order and the first candidate
//! that yields any structurally-valid element wins outright; lower-priority
//! candidates are never consulted after that, even for disambiguation.

use anyhow::Result;
use tracing::{debug, trace};

use crate::document::{DocumentAccess, ElementDescriptor};
use crate::types::{DomPath, SelectorCandidate, SelectorHit, StructuralConstraints};

/// The winning candidate plus every element of the scope it qualified on,
/// in document order
#[derive(Clone, Debug)]
pub struct EvaluatedInstances {
    pub hit: SelectorHit,
    pub instances: Vec<ElementDescriptor>,
}

/// The winning candidate and the first qualifying element in document order
#[derive(Clone, Debug)]
pub struct EvaluatorMatch {
    pub hit: SelectorHit,
    pub element: ElementDescriptor,
}

/// Evaluate candidates against `scope`, returning the first qualifying
/// element of the highest-scoring candidate that produces one.
///
/// Disambiguation between multiple instances is deliberately not done here;
/// callers that want the Nth instance go through [`evaluate_instances`] with
/// an explicit index.
pub async fn evaluate(
    doc: &dyn DocumentAccess,
    scope: Option<&DomPath>,
    candidates: &[SelectorCandidate],
    constraints: &StructuralConstraints,
) -> Result<Option<EvaluatorMatch>> {
    let evaluated = evaluate_instances(doc, scope, candidates, constraints).await?;
    Ok(evaluated.map(|mut found| EvaluatorMatch {
        hit: found.hit,
        element: found.instances.remove(0),
    }))
}

/// Evaluate candidates against `scope`, returning all qualifying instances of
/// the winning candidate. `None` only after every candidate is exhausted.
pub async fn evaluate_instances(
    doc: &dyn DocumentAccess,
    scope: Option<&DomPath>,
    candidates: &[SelectorCandidate],
    constraints: &StructuralConstraints,
) -> Result<Option<EvaluatedInstances>> {
    // Definitions arrive ordered from the registry, but the strict descending
    // order is an invariant of evaluation, so it is enforced here too.
    let mut ranked: Vec<&SelectorCandidate> = candidates.iter().collect();
    ranked.sort_by_key(|c| std::cmp::Reverse(c.score));

    for candidate in ranked {
        trace!(
            "Trying candidate '{}' (variant: {}, score: {})",
            candidate.css,
            candidate.variant,
            candidate.score
        );

        let matches = doc.query(scope, &candidate.css).await?;
        if matches.is_empty() {
            continue;
        }

        let mut qualifying = Vec::with_capacity(matches.len());
        for element in matches {
            if satisfies_constraints(doc, &element, constraints).await? {
                qualifying.push(element);
            }
        }

        if !qualifying.is_empty() {
            debug!(
                "Candidate '{}' qualified with {} instance(s) (score: {})",
                candidate.css,
                qualifying.len(),
                candidate.score
            );
            return Ok(Some(EvaluatedInstances {
                hit: SelectorHit::from(candidate),
                instances: qualifying,
            }));
        }

        debug!(
            "Candidate '{}' matched but no instance passed structural constraints",
            candidate.css
        );
    }

    Ok(None)
}

/// Check the structural constraints against one candidate element
async fn satisfies_constraints(
    doc: &dyn DocumentAccess,
    element: &ElementDescriptor,
    constraints: &StructuralConstraints,
) -> Result<bool> {
    if constraints.is_empty() {
        return Ok(true);
    }

    for fingerprint in &constraints.required_descendants_any {
        let descendants = doc.query(Some(&element.dom_path), fingerprint).await?;
        if !descendants.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}
