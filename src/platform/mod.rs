//! Host metrics and external collaborator seams.

pub mod collaborators;
pub mod exec;
pub mod pal;
