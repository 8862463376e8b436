//! SLSA provenance: statement, materials, signing, and transparency log.

mod builder;
mod materials;
mod statement;
mod tlog;
mod trace;

pub use builder::AttestationBuilder;
pub use materials::{assemble, helm_primary, kustomize_primary, normalize_uri};
pub use statement::{
    DigestSet, Material, Metadata, ProvenancePredicate, Recipe, Statement, Subject, ENTRY_POINT,
    SLSA_PREDICATE_TYPE, STATEMENT_TYPE,
};
pub use tlog::{entry_uuid_from_output, RekorCli, TransparencyLog};
pub use trace::trace_materials;
