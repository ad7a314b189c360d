//! Built-in prompt templates.

use super::names;

pub(super) const DEFAULTS: &[(&str, &str)] = &[
    (names::RESEARCH_QUERIES, RESEARCH_QUERIES),
    (names::RESEARCH_SUMMARY, RESEARCH_SUMMARY),
    (names::PLAN, PLAN),
    (names::PLAN_STRICT, PLAN_STRICT),
    (names::WRITE, WRITE),
    (names::QUESTION, QUESTION),
    (names::DEEPEN, DEEPEN),
    (names::CODE, CODE),
    (names::DIAGRAM, DIAGRAM),
    (names::IMAGE, IMAGE),
    (names::REVIEW, REVIEW),
    (names::REVISE, REVISE),
];

const RESEARCH_QUERIES: &str = r#"You are preparing research for a {{ article_type }} article about "{{ topic }}" aimed at {{ audience }} readers.
Suggest {{ count }} distinct web search queries that would surface authoritative sources.
Reply with a JSON object: {"queries": ["..."]}"#;

const RESEARCH_SUMMARY: &str = r#"Summarize the following search results for an article about "{{ topic }}".

{{ results }}

Reply with a JSON object: {"background": "two or three paragraphs", "key_concepts": ["..."]}"#;

const PLAN: &str = r#"Plan a {{ length }} {{ article_type }} article about "{{ topic }}" for {{ audience }} readers.

Background:
{{ background }}

Key concepts:
{{ key_concepts }}

Sources:
{{ sources }}

Source material supplied by the author:
{{ source_material }}

Use about {{ section_count }} sections. Include code examples: {{ include_code }}.
Reply with a JSON object:
{"title": "...", "subtitle": "...", "sections": [{"id": "kebab-case-id", "title": "...", "intent": "what the section achieves", "illustration": {"kind": "diagram|image", "description": "..."} or null, "code_examples": ["short description"]}]}"#;

const PLAN_STRICT: &str = r#"Your previous outline could not be used: {{ previous_error }}

Plan a {{ length }} {{ article_type }} article about "{{ topic }}" for {{ audience }} readers.

Background:
{{ background }}

Key concepts:
{{ key_concepts }}

Sources:
{{ sources }}

Source material supplied by the author:
{{ source_material }}

Use about {{ section_count }} sections. Include code examples: {{ include_code }}.
Reply with ONLY a JSON object, no prose and no code fences. Every section needs a non-empty title and a unique id:
{"title": "...", "subtitle": "...", "sections": [{"id": "kebab-case-id", "title": "...", "intent": "...", "illustration": null, "code_examples": []}]}"#;

const WRITE: &str = r#"Write the section "{{ section_title }}" of an article about "{{ topic }}" for {{ audience }} readers.
Goal of the section: {{ section_intent }}
Previous section: {{ previous_section }}
Next section: {{ next_section }}

Background:
{{ background }}

Sources you may cite:
{{ sources }}

Where a code example belongs, insert a placeholder of the form [CODE: short_id - description] on its own line. Planned examples:
{{ code_examples }}

Aim for about {{ target_words }} words of Markdown. Do not repeat the section heading."#;

const CODE: &str = r#"Write a {{ language }} example for the section "{{ section_title }}" of an article for {{ audience }} readers.
The example should show: {{ description }}

Section text for context:
{{ section_text }}

Reply with a JSON object: {"code": "...", "output": "expected output or empty", "explanation": "one short paragraph"}"#;

const DIAGRAM: &str = r#"Create a Mermaid diagram for the section "{{ section_title }}" of an article about "{{ topic }}".
The diagram should show: {{ description }}
Reply with Mermaid source only."#;

const IMAGE: &str = r#"Illustration for an article about "{{ topic }}", section "{{ section_title }}": {{ description }}"#;

const REVIEW: &str = r#"Review this article about "{{ topic }}".

Outline:
{{ outline }}

Article:
{{ article }}

Score it from 0 to 100 for accuracy, clarity and completeness.
Reply with a JSON object: {"score": 0, "approved": true, "issues": [{"section_id": "id or null", "description": "..."}]}"#;

const QUESTION: &str = r#"You are a demanding technical editor reading the section "{{ section_title }}" of an article about "{{ topic }}" for {{ audience }} readers.
Find passages that are vague: claims without explanation, steps without detail, terms used but never defined.

Section text:
{{ section_text }}

Reply with a JSON object:
{"is_detailed_enough": true, "depth_score": 0-100, "vague_points": [{"location": "quoted passage", "issue": "what is missing", "question": "what a reader would ask", "suggestion": "what to add"}]}"#;

const DEEPEN: &str = r#"Rewrite the section "{{ section_title }}" of an article about "{{ topic }}" so that it answers these reader questions:
{{ vague_points }}

Current text:
{{ section_text }}

Keep everything that is already correct and every [CODE: ...] placeholder unchanged. Reply with the rewritten Markdown only."#;

const REVISE: &str = r#"Revise the section "{{ section_title }}" of an article about "{{ topic }}" to address these review findings:
{{ issues }}

Current text:
{{ section_text }}

Keep every [CODE: ...] placeholder unchanged. Reply with the revised Markdown only."#;
