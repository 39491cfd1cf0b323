//! External reference portals suggested next to an answer.
//!
//! A question is matched against each topic's keywords; the industry of the asking user
//! breaks ties. At most one link is suggested.

struct LinkTopic {
    url: &'static str,
    keywords: &'static [&'static str],
    /// ÖNACE sections for which this topic is the natural reference.
    industries: &'static [&'static str],
}

static TOPICS: [LinkTopic; 3] = [
    // Water quality maps.
    LinkTopic {
        url: "https://maps.wisa.bmluk.gv.at/emreg",
        keywords: &[
            "water", "wasser", "groundwater", "grundwasser", "river", "fluss", "lake",
            "freshwater", "drinking", "aquatic", "emreg", "wassergüte", "sewage", "abwasser",
        ],
        industries: &["E"],
    },
    // Industrial emissions portal.
    LinkTopic {
        url: "https://industry.eea.europa.eu/explore/explore-data-map/map",
        keywords: &[
            "industrial", "industry", "industrie", "factory", "fabrik", "facility", "plant",
            "manufacturing", "production", "emission", "emissions", "pollution", "ied",
        ],
        industries: &["B", "C", "D"],
    },
    // Natura 2000 viewer.
    LinkTopic {
        url: "https://natura2000.eea.europa.eu",
        keywords: &[
            "biodiversity", "biodiversität", "natura", "natura2000", "protected", "habitat",
            "wildlife", "species", "ecosystem", "ecosystems", "conservation", "naturschutz",
        ],
        industries: &["A"],
    },
];

/// Links for the topic `query` is most clearly about, or none.
pub fn relevant_links(query: &str, industry_code: Option<&str>) -> Vec<String> {
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    let industry = industry_code.map(str::to_ascii_uppercase);
    let scored = TOPICS.iter().filter_map(|topic| {
        let hits = words
            .iter()
            .filter(|w| topic.keywords.contains(&w.as_str()))
            .count();
        if hits == 0 {
            return None;
        }
        let affinity = industry
            .as_deref()
            .is_some_and(|code| topic.industries.contains(&code));
        Some(((hits, affinity), topic))
    });

    // Ties go to the earlier topic.
    let mut best: Option<((usize, bool), &LinkTopic)> = None;
    for (score, topic) in scored {
        if best.is_none_or(|(current, _)| score > current) {
            best = Some((score, topic));
        }
    }
    best.map(|(_, topic)| vec![topic.url.to_string()])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_water_question_gets_water_portal() {
        let links = relevant_links("How is groundwater quality monitored?", None);
        assert_eq!(links, vec!["https://maps.wisa.bmluk.gv.at/emreg"]);
    }

    #[test]
    fn test_unrelated_question_gets_nothing() {
        assert!(relevant_links("What is the VSME reporting deadline?", Some("C")).is_empty());
    }

    #[test]
    fn test_industry_breaks_ties() {
        // One water keyword, one industry keyword.
        let query = "water use of the factory";
        assert_eq!(
            relevant_links(query, None),
            vec!["https://maps.wisa.bmluk.gv.at/emreg"]
        );
        assert_eq!(
            relevant_links(query, Some("c")),
            vec!["https://industry.eea.europa.eu/explore/explore-data-map/map"]
        );
    }
}
