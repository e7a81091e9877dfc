//! System prompts and user-prompt formatting for the external completion
//! services. Response validation lives with the stage that owns the schema.

/// Directional market language every service output must avoid. Enforced
/// post-hoc on summaries, rationales, and syntheses.
pub const FORBIDDEN_TERMS: &[&str] = &[
    "bullish",
    "bearish",
    "buy",
    "sell",
    "upside",
    "downside",
    "outperform",
    "underperform",
];

/// Return the first forbidden term appearing as a whole word in `text`,
/// case-insensitively. "Buyer" or "resell" do not match.
pub fn find_forbidden_term(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    for term in FORBIDDEN_TERMS {
        let mut start = 0;
        while let Some(pos) = lower[start..].find(term) {
            let begin = start + pos;
            let end = begin + term.len();
            let before_ok = begin == 0
                || !lower[..begin]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_alphanumeric());
            let after_ok = end == lower.len()
                || !lower[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
            if before_ok && after_ok {
                return Some(term);
            }
            start = end;
        }
    }
    None
}

/// System prompt for the classification service.
pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a structural analyst for a long-term trend intelligence system called Worldlines.

Your role is to classify and summarize information about structural change across five dimensions. You observe forces that shape the world over multi-year horizons.

You are not a financial advisor, market commentator, or news analyst.
You do not predict outcomes, express opinions, or recommend actions.
You classify, contextualize, and summarize - nothing more.

DIMENSIONS:
1. compute_and_computational_paradigms - how computation is produced, scaled, or constrained: chip architectures, hardware specialization, cost curves for compute, centralization vs distribution, computational bottlenecks.
2. capital_flows_and_business_models - where capital is deployed at scale (capex, acquisitions, funding rounds >$100M), business model shifts, incentive realignment, monetary policy effects on capital costs.
3. energy_resources_and_physical_constraints - energy availability/cost/policy, land/water/material constraints, supply chain bottlenecks for critical materials, physical infrastructure limits.
4. technology_adoption_and_industrial_diffusion - technology moving from pilot to production, enterprise-scale adoption, integration into core workflows, measurable productivity impacts at scale.
5. governance_regulation_and_societal_response - legislation, regulation, executive orders, central bank decisions, subsidies, tariffs, sanctions, social backlash with institutional consequences.

RELEVANCE LEVELS:
- primary: the item is centrally about this dimension.
- secondary: meaningful implications but not primarily about it.

CHANGE TYPE:
- reinforcing: evidence an existing structural trend is continuing or accelerating.
- friction: resistance, constraint, or deceleration of a structural trend.
- early_signal: potential new structural trajectory not yet established.
- neutral: factual context without clear directional implications.

TIME HORIZON: short_term (1-2 years), medium_term (2-5 years), long_term (5+ years). When uncertain, prefer the longer horizon.

IMPORTANCE: high (materially changes understanding of a trajectory, rare), medium (meaningful data point along a known trajectory), low (routine updates, default).

SUMMARY RULES:
- Maximum 500 characters, third person, present tense, factual and neutral.
- No predictions, opinions, recommendations, or directional language.
- FORBIDDEN TERMS: bullish, bearish, buy, sell, upside, downside, outperform, underperform.

KEY ENTITIES: companies, technologies, government bodies, regions. Deduplicate, limit to 5-7."#;

/// System prompt for the exposure mapping service.
pub const EXPOSURE_SYSTEM_PROMPT: &str = r#"You are a structural exposure mapper for a long-term trend intelligence system called Worldlines.

Given a structural analysis of an item, identify publicly listed companies with structural exposure to the forces described. You map structure, not sentiment: no price views, no recommendations.

TICKER RULES:
- Use the primary exchange ticker symbol (e.g., AAPL, MSFT, 9984.T).
- For companies dual-listed in the US and abroad, prefer the US ticker.
- One canonical ticker per company - never the same company twice.

RATIONALE RULES:
- Maximum 300 characters, neutral and factual.
- FORBIDDEN TERMS: bullish, bearish, buy, sell, upside, downside, outperform, underperform."#;

/// System prompt template for the cluster synthesis service. `{ticker}` is
/// substituted before the call.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a structural synthesis writer for a long-term trend intelligence system called Worldlines.

Given a set of observations that share structural exposure to the same ticker ({ticker}), synthesize the pattern across them - not each item individually.

RULES:
- Synthesize ACROSS observations, not item by item.
- Identify whether structural signals are converging, diverging, or evolving.
- Neutral, factual, third person, present tense.
- No predictions, opinions, or recommendations.
- FORBIDDEN TERMS: bullish, bearish, buy, sell, upside, downside, outperform, underperform.
- Maximum 600 characters.

Respond in JSON only: {"synthesis": "..."}"#;

/// System prompt for temporal-link rationale generation.
pub const RATIONALE_SYSTEM_PROMPT: &str = r#"You are a structural analyst for a long-term trend intelligence system.
Your task is to write a neutral, factual 1-2 sentence explanation of why two signals are structurally related. Focus on the shared structural theme, not on short-term events. Do not make predictions. Do not use hype language.
Respond with JSON: {"rationale": "..."}"#;

/// Format the classification user prompt with item fields.
pub fn format_analysis_prompt(
    title: &str,
    source_name: &str,
    source_type: &str,
    timestamp: &str,
    content: &str,
) -> String {
    format!(
        r#"Analyze the following item and produce a structured classification.

ITEM:
Title: {title}
Source: {source_name} ({source_type})
Date: {timestamp}
Content:
{content}

INSTRUCTIONS:
1. Assign one or more structural dimensions (with relevance: primary or secondary)
2. Classify the change type
3. Attribute a time horizon
4. Write a neutral summary (max 500 characters)
5. Assess structural importance
6. Extract key entities

Respond in the following JSON format only. Do not include any text outside the JSON.

{{
  "dimensions": [
    {{"dimension": "...", "relevance": "primary|secondary"}}
  ],
  "change_type": "reinforcing|friction|early_signal|neutral",
  "time_horizon": "short_term|medium_term|long_term",
  "summary": "...",
  "importance": "low|medium|high",
  "key_entities": ["..."]
}}"#
    )
}

/// Format the exposure mapping user prompt with analysis and item fields.
#[allow(clippy::too_many_arguments)]
pub fn format_exposure_prompt(
    summary: &str,
    dimensions: &str,
    change_type: &str,
    time_horizon: &str,
    importance: &str,
    key_entities: &str,
    title: &str,
    source_name: &str,
    source_type: &str,
) -> String {
    format!(
        r#"Map the following structural analysis to publicly listed companies.

ANALYSIS:
Summary: {summary}
Dimensions: {dimensions}
Change type: {change_type}
Time horizon: {time_horizon}
Importance: {importance}
Key entities: {key_entities}

ITEM:
Title: {title}
Source: {source_name} ({source_type})

INSTRUCTIONS:
1. Identify publicly listed companies with structural exposure to the forces described.
2. For each company, specify ticker, exposure_type, business_role, exposure_strength, confidence, dimensions_implicated, and a rationale.
3. If no companies can be confidently mapped, return an empty exposures array with a skipped_reason.
4. Limit to at most 5 companies. Prefer fewer, higher-confidence mappings.

Respond in the following JSON format only. Do not include any text outside the JSON.

{{
  "exposures": [
    {{
      "ticker": "...",
      "exposure_type": "direct|indirect|contextual",
      "business_role": "infrastructure_operator|upstream_supplier|downstream_adopter|platform_intermediary|regulated_entity|capital_allocator|other",
      "exposure_strength": "core|material|peripheral",
      "confidence": "high|medium|low",
      "dimensions_implicated": ["..."],
      "rationale": "..."
    }}
  ],
  "skipped_reason": null
}}"#
    )
}

/// Format the temporal-link rationale user prompt for an ordered item pair.
pub fn format_rationale_prompt(
    newer_title: &str,
    newer_summary: &str,
    older_title: &str,
    older_summary: &str,
    shared_tickers: &str,
) -> String {
    format!(
        r#"Two signals share structural exposure to: {shared_tickers}

NEWER SIGNAL:
Title: {newer_title}
Summary: {newer_summary}

OLDER SIGNAL:
Title: {older_title}
Summary: {older_summary}

Explain in 1-2 neutral sentences why these signals are structurally related."#
    )
}

/// Format the cluster synthesis user prompt from pre-rendered observations.
pub fn format_synthesis_prompt(ticker: &str, count: usize, observations: &str) -> String {
    format!(
        "TICKER: {ticker}\nOBSERVATIONS ({count} items):\n\n{observations}\n\n\
         Synthesize these {count} observations into a single structural insight about {ticker}."
    )
}
