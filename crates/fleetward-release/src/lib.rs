mod download;
mod resolver;
mod source;

pub use download::{part_path_for, ArtifactSource, HttpArtifactSource};
pub use resolver::VersionResolver;
pub use source::{HttpReleaseSource, ReleaseSource};

#[cfg(test)]
mod tests;
