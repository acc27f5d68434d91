//! Local, template-based Hypothetical Document Embeddings (§4.6 step 2).
//!
//! Classifies query intent, generates a handful of template variants, embeds
//! each, and averages into a centroid — no LLM round-trip required.

/// Query intent classification, used to pick expansion templates.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryIntent {
    Definition,
    HowTo,
    Reasoning,
    Temporal,
    Lookup,
    Technical,
}

/// Classify query intent from the raw query string.
pub fn classify_intent(query: &str) -> QueryIntent {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();

    if lower.contains("how to") || lower.starts_with("how do") || lower.starts_with("steps") {
        return QueryIntent::HowTo;
    }
    if lower.starts_with("what is")
        || lower.starts_with("what are")
        || lower.starts_with("define")
        || lower.starts_with("explain")
    {
        return QueryIntent::Definition;
    }
    if lower.starts_with("why") || lower.contains("reason") || lower.contains("because") {
        return QueryIntent::Reasoning;
    }
    if lower.starts_with("when") || lower.contains("date") || lower.contains("timeline") {
        return QueryIntent::Temporal;
    }
    if query.contains('(')
        || query.contains('{')
        || query.contains("fn ")
        || query.contains("class ")
        || query.contains("::")
    {
        return QueryIntent::Technical;
    }

    if words.len() >= 2 {
        QueryIntent::Lookup
    } else {
        QueryIntent::Technical
    }
}

/// Generate expanded query variants based on intent.
pub fn expand_query(query: &str) -> Vec<String> {
    let intent = classify_intent(query);
    let clean = query.trim().trim_end_matches('?').trim_end_matches('.');
    let mut variants = vec![query.to_string()];

    match intent {
        QueryIntent::Definition => {
            variants.push(format!("{clean} is a concept that involves"));
            variants.push(format!("The definition of {clean} in the context of"));
            variants.push(format!("{clean} refers to a type of"));
        }
        QueryIntent::HowTo => {
            variants.push(format!("The steps to {clean} are as follows"));
            variants.push(format!("To accomplish {clean}, you need to"));
            variants.push(format!("A guide for {clean} including"));
        }
        QueryIntent::Reasoning => {
            variants.push(format!("The reason {clean} is because"));
            variants.push(format!("{clean} happens due to the following factors"));
            variants.push(format!("The explanation for {clean} involves"));
        }
        QueryIntent::Temporal => {
            variants.push(format!("{clean} occurred at a specific time"));
            variants.push(format!("The timeline of {clean} shows"));
            variants.push(format!("Events related to {clean} in chronological order"));
        }
        QueryIntent::Lookup => {
            variants.push(format!("Information about {clean} including details"));
            variants.push(format!("{clean} is related to the following topics"));
            variants.push(format!("Key facts about {clean}"));
        }
        QueryIntent::Technical => {
            variants.push(format!("{clean} implementation details"));
            variants.push(format!("Code pattern for {clean}"));
        }
    }

    variants
}
