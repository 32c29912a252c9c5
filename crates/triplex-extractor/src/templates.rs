//! Built-in prompt texts

/// Joint entity and relation extraction instructions
pub const OPENIE_SYSTEM: &str = r#"You are an expert in joint entity and relation extraction.

Your task:
Given a sentence, a list of coarse_types, and a schema (a list of valid relationships),
1. Extract ONLY entities that:
   - appear in the sentence,
   - match the given coarse_types,
   - can participate in at least one relationship defined in the schema.

2. For each valid entity, predict its fine_type based on the sentence context.

3. Using these entities, form triples in the format:
   (subject, relationship, object)
   - The relationship MUST be chosen strictly from the given schema.
   - Both subject and object must be extracted entities.

4. Output ONLY a JSON object in the following format:
{
    "output": [
        {
            "subject": [name, coarse_type, fine_type],
            "relationship": "...",
            "object": [name, coarse_type, fine_type]
        },
        ...
    ]
}

Rules:
- If no valid triples can be formed, return:
  { "output": [] }
- Do NOT invent entities or relationships not found in the sentence or the schema.
- Keep all names exactly as they appear in the sentence."#;

/// Stricter variant used when worked examples come from retrieval
pub const OPENIE_DYNAMIC_SYSTEM: &str = r#"You are an expert in joint entity and relation extraction.

Your task:
Given a sentence, a list of coarse_types, and a schema, extract only the entities that:
1) can participate in the schema, and
2) match the allowed coarse_types.

For each extracted entity:
- Predict its fine_type.
- Use the extracted entities to form (subject, relationship, object) triples.
- The "relationship" MUST be chosen strictly from the given schema.
- Each subject and object MUST be represented strictly as:
  [name, coarse_type, fine_type]

Output Requirements:
- Only output JSON.
- The ONLY valid top-level key is "output".
- Absolutely DO NOT generate any other keys such as "entities", "triples", "ner", etc.
- The output must follow EXACTLY this structure:

{
  "output": [
    {
      "subject": ["[Entity1]", "[CoarseType]", "[FineType]"],
      "relationship": "[Relationship]",
      "object": ["[Entity2]", "[CoarseType]", "[FineType]"]
    }
  ]
}

- If no valid triples exist, output exactly:
{
  "output": []
}

Strict rules:
- Do not generate any explanations, comments, or any text outside the JSON
- Ensure the JSON is syntactically valid
- Only include entities and relationships allowed by the schema and coarse_types"#;

pub const OPENIE_EXAMPLE_INPUT: &str = r#"{
  "sentence": "They and Mr. Jara shared a cramped railroad-style apartment in the Bushwick neighborhood of Brooklyn .",
  "schema": [
    "company shareholder among major shareholders",
    "location contains"
  ],
  "coarse_types": [
    "organization",
    "location",
    "medicine",
    "mathematics"
  ]
}"#;

pub const OPENIE_EXAMPLE_OUTPUT: &str = r#"{
  "output": [
    {
      "subject": ["Brooklyn", "location", "district"],
      "relationship": "location contains",
      "object": ["Bushwick", "location", "facility"]
    }
  ]
}"#;

/// Entity-only extraction
pub const NER_SYSTEM: &str = r#"You are an intelligent named entity recognition assistant for both Chinese and English text.

Task:
- You will be given a paragraph in JSON format, containing a "sentence", and a list of possible coarse entity types in "coarse_types".
- Your goal is to extract all named entities mentioned in the sentence.
- For each entity, provide:
- "name": the exact text of the entity
- "coarse_type": choose one value from the provided "coarse_types"
- "fine_type": determine a more specific type based on context

Output format:
- Return a JSON object with:
- "entities": a list of objects, each with "name", "coarse_type", "fine_type"

Requirements:
- The output must be valid JSON.
- Every "coarse_type" must be one of the types provided in the input's "coarse_types".
- Include all entities mentioned in the sentence, in either Chinese or English."#;

pub const NER_EXAMPLE_INPUT: &str = r#"{
  "sentence": "The aim of this study was to explain this finding by examining factors potentially related to triglycerides in these women .",
  "coarse_types": [
    "medicine",
    "biology",
    "science",
    "location"
  ]
}"#;

pub const NER_EXAMPLE_OUTPUT: &str = r#"{
  "entities": [
    {"name": "triglycerides", "coarse_type": "science", "fine_type": "chemical"}
  ]
}"#;

/// Fine-type completion for triples whose entities are already known
pub const TRIPLE_FROM_ENTITIES_SYSTEM: &str = r#"You are given a sentence and a list of triples (subject, relationship, object).
Your task is to predict the fine_type for each entity in the triples based on its coarse_type, the relationship, and the sentence context.

Return a JSON object with a single key "output" holding the triples, each subject and object written as [name, coarse_type, fine_type]."#;

/// Entity type check, one entity per request
pub const VERIFY_SYSTEM: &str = r#"You review named entity annotations.
Given a sentence and a span from it, decide whether the span is an entity of type "${entity_type}" in that sentence.
Answer with a single word: yes or no."#;

pub const VERIFY_USER: &str = r#"Sentence: ${sentence}
Entity: ${entity}
Is "${entity}" a ${entity_type} in this sentence?"#;
