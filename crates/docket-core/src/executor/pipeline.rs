//! Stage order and how each stage splits into units.

use crate::tracker::StageName;

/// Where a service stage's work units come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSource {
    /// One unit per page, numbered 1..=page_count.
    Pages,
    /// One unit per chunk of the document, numbered by chunk index.
    Chunks,
    /// A single unit (0) for the whole document.
    Single,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageMode {
    /// Calls the external service once per unit, under an optional governor name.
    Service {
        governor: Option<String>,
        units: UnitSource,
    },
    /// Links recognized boxes to chunks locally.
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub name: StageName,
    pub mode: StageMode,
}

impl StageSpec {
    pub fn service(name: StageName, governor: Option<&str>, units: UnitSource) -> Self {
        Self {
            name,
            mode: StageMode::Service {
                governor: governor.map(str::to_string),
                units,
            },
        }
    }

    pub fn link(name: StageName) -> Self {
        Self {
            name,
            mode: StageMode::Link,
        }
    }
}

/// Ordered stages a job runs through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<StageSpec>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            stages: vec![
                StageSpec::service(StageName::Recognition, Some("recognition"), UnitSource::Pages),
                StageSpec::service(StageName::Validation, None, UnitSource::Pages),
                StageSpec::link(StageName::Chunking),
                StageSpec::service(StageName::Embedding, Some("embedding"), UnitSource::Chunks),
                StageSpec::service(
                    StageName::EntityExtraction,
                    Some("extraction"),
                    UnitSource::Chunks,
                ),
                StageSpec::service(
                    StageName::AliasResolution,
                    Some("extraction"),
                    UnitSource::Single,
                ),
            ],
        }
    }
}

impl Pipeline {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_follows_stage_order() {
        let p = Pipeline::default();
        let names: Vec<StageName> = p.stages.iter().map(|s| s.name).collect();
        assert_eq!(names, StageName::ALL.to_vec());
        assert_eq!(p.stages[2].mode, StageMode::Link);
        assert!(matches!(
            &p.stages[1].mode,
            StageMode::Service { governor: None, units: UnitSource::Pages }
        ));
    }
}
