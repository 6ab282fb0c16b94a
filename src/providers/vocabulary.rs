use log::info;
use std::path::Path;

use crate::errors::Result;

/// 板块/行业名称规范化（纠正大小写）
pub trait SectorVocabulary {
    /// 返回规范写法，无匹配时返回 None
    fn canonicalize(&self, name: &str) -> Option<String>;
}

/// 板块 -> 行业映射表，每行 `sector,industry`，无表头
#[derive(Debug, Clone, Default)]
pub struct SectorIndustryMap {
    pairs: Vec<(String, String)>,
}

impl SectorIndustryMap {
    pub fn from_pairs<S: AsRef<str>>(pairs: &[(S, S)]) -> Self {
        Self {
            pairs: pairs
                .iter()
                .map(|(s, i)| (s.as_ref().to_string(), i.as_ref().to_string()))
                .collect(),
        }
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut pairs = Vec::new();
        for row in reader.records() {
            let row = row?;
            let sector = row.get(0).unwrap_or_default();
            let industry = row.get(1).unwrap_or_default();
            if sector.is_empty() && industry.is_empty() {
                continue;
            }
            pairs.push((sector.to_string(), industry.to_string()));
        }

        info!("Loaded {} sector/industry pairs from {}", pairs.len(), path.display());
        Ok(Self { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl SectorVocabulary for SectorIndustryMap {
    fn canonicalize(&self, name: &str) -> Option<String> {
        let wanted = name.trim();
        for (sector, industry) in &self.pairs {
            if !sector.is_empty() && sector.eq_ignore_ascii_case(wanted) {
                return Some(sector.clone());
            }
            if !industry.is_empty() && industry.eq_ignore_ascii_case(wanted) {
                return Some(industry.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_canonicalize_sector_and_industry() {
        let map = SectorIndustryMap::from_pairs(&[
            ("Technology", "Software-Infrastructure"),
            ("Consumer Defensive", "Grocery Stores"),
        ]);
        assert_eq!(map.canonicalize("technology").as_deref(), Some("Technology"));
        assert_eq!(map.canonicalize("GROCERY STORES").as_deref(), Some("Grocery Stores"));
        assert_eq!(map.canonicalize("gambling"), None);
    }

    #[test]
    fn test_from_csv_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sector_to_industry.csv");
        fs::write(&path, "Healthcare,Biotechnology\nEnergy, Oil & Gas E&P\n\n").unwrap();

        let map = SectorIndustryMap::from_csv_path(&path).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.canonicalize("oil & gas e&p").as_deref(), Some("Oil & Gas E&P"));
        assert_eq!(map.canonicalize("healthcare").as_deref(), Some("Healthcare"));
    }
}
