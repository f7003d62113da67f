//! Composition errors.
//!
//! Errors here are data, not control flow: every error is attached to the
//! narrowest result it affects (a layer stack's local error list or a prim
//! index's error vector) and composition continues, omitting only the
//! offending contribution. No public operation in this crate returns
//! `Result` for a composition-level problem.

use thiserror::Error;

use crate::sdf::{LayerOffset, Path, SpecType};

pub type PcpErrorVector = Vec<PcpError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PcpError {
    /// A composition arc revisits a site already being expanded.
    #[error("composition cycle detected at <{site}> via {}", path_chain(.chain))]
    ArcCycle { site: Path, chain: Vec<Path> },

    /// A layer transitively sublayers itself.
    #[error("sublayer cycle: layer @{layer}@ includes @{sublayer}@ which is already in the stack")]
    SublayerCycle { layer: String, sublayer: String },

    #[error("invalid target prim path for arc at <{site}>: no target prim and no default prim")]
    InvalidPrimPath { site: Path },

    #[error("could not resolve asset path @{asset_path}@ for arc at <{site}>")]
    InvalidAssetPath { site: Path, asset_path: String },

    #[error("asset @{asset_path}@ for arc at <{site}> is muted")]
    MutedAssetPath { site: Path, asset_path: String },

    #[error("could not resolve sublayer @{sublayer_path}@ of layer @{layer}@")]
    InvalidSublayerPath { layer: String, sublayer_path: String },

    #[error("invalid offset {offset:?} for sublayer @{sublayer}@ of layer @{layer}@")]
    InvalidSublayerOffset {
        layer: String,
        sublayer: String,
        offset: LayerOffset,
    },

    #[error("invalid selection '{selection}' for variant set '{set}' at <{site}>")]
    InvalidVariantSelection {
        site: Path,
        set: String,
        selection: String,
    },

    #[error("spec at <{path}> in @{layer}@ is a {found:?}, but stronger opinions say {expected:?}")]
    InconsistentPropertyType {
        path: Path,
        layer: String,
        expected: SpecType,
        found: SpecType,
    },

    #[error("attribute <{path}> in @{layer}@ has type '{found}', but stronger opinions say '{expected}'")]
    InconsistentAttributeType {
        path: Path,
        layer: String,
        expected: String,
        found: String,
    },

    #[error("attribute <{path}> in @{layer}@ disagrees with stronger opinions about variability")]
    InconsistentAttributeVariability { path: Path, layer: String },

    #[error("arc at <{site}> targets private site <{target}>")]
    ArcPermissionDenied { site: Path, target: Path },

    #[error("prim at <{site}> is private")]
    PrimPermissionDenied { site: Path },

    #[error("property <{path}> in @{layer}@ is shadowed by a private opinion")]
    PropertyPermissionDenied { path: Path, layer: String },

    #[error("target <{target}> of <{path}> crosses into a private namespace")]
    TargetPermissionDenied { path: Path, target: Path },

    /// A relationship target or attribute connection escapes the namespace
    /// its owning arc can legally express.
    #[error("target <{target}> of <{owner}> has no translation into the composed namespace")]
    InvalidTargetPath { owner: Path, target: Path },

    #[error("invalid relocate {relocate_source} -> {target} in @{layer}@: {reason}")]
    InvalidRelocate {
        layer: String,
        // Not named `source`; thiserror reserves that for Error::source().
        relocate_source: Path,
        target: Path,
        reason: String,
    },

    #[error("conflicting relocate for {relocate_source} in @{layer}@: {target} vs {existing_target}")]
    ConflictingRelocate {
        layer: String,
        relocate_source: Path,
        target: Path,
        existing_target: Path,
    },
}

fn path_chain(chain: &[Path]) -> String {
    chain
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
