#[derive(Debug, Default)]
pub struct CorpusLoadCounters {
    pub total: u64,
    pub loaded: u64,
    pub skipped: u64,
    pub dna2: u64,
    pub dna4: u64,
}

impl std::ops::AddAssign for CorpusLoadCounters {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.loaded += other.loaded;
        self.skipped += other.skipped;
        self.dna2 += other.dna2;
        self.dna4 += other.dna4;
    }
}

impl CorpusLoadCounters {
    pub fn report(&self) -> String {
        format!(
            "{} lines, {} sequences loaded ({} DNA2, {} DNA4), {} skipped",
            self.total, self.loaded, self.dna2, self.dna4, self.skipped
        )
    }
}
