//! Stage lists per work item kind.

use arkive_core::models::{ItemKind, Stage};
use arkive_core::Config;

/// Stages of `kind` in execution order, narrowed by configuration.
///
/// A directory split into tar parts only reconciles its parts; each part is then a
/// work item of its own.
pub fn plan_stages(kind: ItemKind, config: &Config) -> Vec<Stage> {
    let mut stages = Vec::new();
    match kind {
        ItemKind::Directory if config.archive.files_per_tar.is_some() => {
            return vec![Stage::MultiTar];
        }
        ItemKind::Directory => {
            stages.push(Stage::Tar);
            stages.push(Stage::Contents);
        }
        ItemKind::File if config.archive.compress => stages.push(Stage::Compress),
        ItemKind::Member => stages.push(Stage::Untar),
        ItemKind::File | ItemKind::TarPart | ItemKind::Manifest => {}
    }

    stages.push(Stage::Metadata);
    if config.checksum {
        stages.push(Stage::Checksum);
    }
    stages.push(Stage::Upload);
    stages.push(Stage::Verify);
    stages.push(Stage::PermissionBookmark);
    if config.cleanup {
        stages.push(Stage::Cleanup);
    }
    stages
}
