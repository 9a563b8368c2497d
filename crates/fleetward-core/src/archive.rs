/// Packaging of a runner release asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    /// Linux and macOS assets.
    TarGz,
    /// Windows assets.
    Zip,
}

impl ArchiveType {
    pub fn extension(self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }

    /// Reads the packaging off an asset name or download URL. Query strings
    /// and fragments are ignored so signed mirror URLs still match.
    pub fn from_asset_name(name: &str) -> Option<Self> {
        let path = name
            .split(['?', '#'])
            .next()
            .unwrap_or(name)
            .to_ascii_lowercase();
        [Self::TarGz, Self::Zip]
            .into_iter()
            .find(|kind| path.ends_with(&format!(".{}", kind.extension())))
            .or_else(|| path.ends_with(".tgz").then_some(Self::TarGz))
    }
}
