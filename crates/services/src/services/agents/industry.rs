use serde::Serialize;

/// Industry buckets with their own copy and layout conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Industry {
    Restaurant,
    Healthcare,
    Legal,
    HomeServices,
    Retail,
    Fitness,
    RealEstate,
    Technology,
    General,
}

const KEYWORDS: &[(Industry, &[&str])] = &[
    (
        Industry::Restaurant,
        &["restaurant", "cafe", "bakery", "bar", "catering", "food"],
    ),
    (
        Industry::Healthcare,
        &["health", "clinic", "dental", "medical", "therapy", "wellness"],
    ),
    (Industry::Legal, &["law", "legal", "attorney", "notary"]),
    (
        Industry::HomeServices,
        &["plumb", "electric", "roof", "hvac", "landscap", "cleaning", "contractor"],
    ),
    (Industry::Retail, &["retail", "shop", "store", "boutique", "ecommerce"]),
    (Industry::Fitness, &["fitness", "gym", "yoga", "pilates", "martial"]),
    (Industry::RealEstate, &["real estate", "realtor", "property", "mortgage"]),
    (
        Industry::Technology,
        &["software", "saas", "tech", "it services", "agency"],
    ),
];

impl Industry {
    pub fn from_label(label: &str) -> Self {
        let label = label.to_lowercase();
        KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| label.contains(w)))
            .map(|(industry, _)| *industry)
            .unwrap_or(Industry::General)
    }

    pub fn guidance(self) -> &'static str {
        match self {
            Industry::Restaurant => {
                "Lead with the menu, opening hours and location. Reservations or ordering must be one click from every page. Use appetite-driven, sensory language."
            }
            Industry::Healthcare => {
                "Emphasise credentials, accepted insurance and how to book. Keep the tone calm and reassuring. Never promise medical outcomes."
            }
            Industry::Legal => {
                "Lead with practice areas and a free consultation call to action. Keep the tone authoritative and plain. Avoid guarantees about case results."
            }
            Industry::HomeServices => {
                "Put the phone number and service area above the fold. Highlight licensing, insurance and emergency availability. Use short, direct sentences."
            }
            Industry::Retail => {
                "Showcase products and current offers first. Make store hours and shipping policies easy to find."
            }
            Industry::Fitness => {
                "Feature class schedules, trainers and a free trial offer. Use energetic, motivating language."
            }
            Industry::RealEstate => {
                "Lead with listings search and local market expertise. Capture leads with valuation or consultation offers."
            }
            Industry::Technology => {
                "Explain the problem solved before the features. Use case studies and clear pricing or demo calls to action."
            }
            Industry::General => {
                "Explain what the business does, who it serves and how to get in touch, in that order."
            }
        }
    }
}
