/// How far a scan has progressed through the pipeline.
///
/// Stages only move forward. The reference scan goes straight from
/// `FeatureReady` to `Composed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScanStage {
    Empty,
    /// Raw points stored (after the ingestion filter box)
    Ingested,
    /// Denoised and downsampled
    Preprocessed,
    /// Normals and descriptors computed
    FeatureReady,
    /// Correspondences against the predecessor found
    Correlated,
    /// Initial SVD transform found
    Aligned,
    /// ICP-adjusted transform found
    Refined,
    /// Global pose fixed and points appended to the composite
    Composed,
}

impl ScanStage {
    pub fn is_composed(self) -> bool {
        self == ScanStage::Composed
    }

    /// The stage after this one; `Composed` is terminal.
    pub fn next(self) -> ScanStage {
        match self {
            ScanStage::Empty => ScanStage::Ingested,
            ScanStage::Ingested => ScanStage::Preprocessed,
            ScanStage::Preprocessed => ScanStage::FeatureReady,
            ScanStage::FeatureReady => ScanStage::Correlated,
            ScanStage::Correlated => ScanStage::Aligned,
            ScanStage::Aligned => ScanStage::Refined,
            ScanStage::Refined | ScanStage::Composed => ScanStage::Composed,
        }
    }
}
