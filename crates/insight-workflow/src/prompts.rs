//! Prompt templates for the generation phases.
//!
//! Text sources are inlined into the prompt; multimodal sources ride along
//! as a file reference on the request and the prompt only instructs.

use insight_core::{ChapterPlan, Outline, SourceContent};

/// Phase B: structured outline request.
pub fn outline_prompt(source: &SourceContent, title_hint: Option<&str>) -> String {
    let hint = title_hint
        .map(|t| format!("参考标题：{t}\n"))
        .unwrap_or_default();
    let source_block = match source {
        SourceContent::Text { text } => format!("\n<源材料>\n{text}\n</源材料>\n"),
        SourceContent::Multimodal { .. } => "\n源材料以附件形式提供，请完整阅读。\n".to_string(),
    };
    format!(
        "你是一位资深技术作者，正在为一份长篇源材料撰写深度解读文档。\n\
         {hint}\
         请通读源材料，输出结构化大纲：一个中文标题（title_cn）、一段引言\
         （introduction），以及 5 到 10 个章节（chapters），每章含递增的整数 id、\
         标题（title）和两三句概要（summary）。章节应覆盖材料的全部核心内容，\
         按叙事逻辑排列，不要互相重叠。\
         {source_block}"
    )
}

/// Phase C: one chapter of the deep read.
pub fn chapter_prompt(outline: &Outline, chapter: &ChapterPlan, source: &SourceContent) -> String {
    let sibling_titles: Vec<String> = outline
        .chapters
        .iter()
        .map(|c| format!("{}. {}", c.id, c.title))
        .collect();
    let source_block = match source {
        SourceContent::Text { text } => format!("\n<源材料>\n{text}\n</源材料>\n"),
        SourceContent::Multimodal { .. } => "\n源材料以附件形式提供。\n".to_string(),
    };
    format!(
        "这是深度解读《{title}》的其中一章。全文章节为：\n{siblings}\n\n\
         现在请撰写第 {id} 章《{chapter_title}》。章节概要：{summary}\n\
         要求：以 `## {chapter_title}` 开头的 Markdown；忠于源材料，引用其中的\
         具体细节、数据与例子；技术术语首次出现时附英文原文；只写本章内容，\
         不要重复其他章节。\
         {source_block}",
        title = outline.title_cn,
        siblings = sibling_titles.join("\n"),
        id = chapter.id,
        chapter_title = chapter.title,
        summary = chapter.summary,
    )
}

/// Phase D: closing section conditioned on the assembled chapter bodies.
pub fn conclusion_prompt(outline: &Outline, chapters_markdown: &str) -> String {
    format!(
        "以下是深度解读《{title}》的全部章节正文：\n\n{chapters_markdown}\n\n\
         请撰写收尾部分，Markdown 格式，依次包含：\n\
         1. `## 洞见与启发` —— 三到五条从全文提炼的洞见；\n\
         2. `## 金句` —— 源材料中最值得记住的两三句话（保留原文并附中文解释）；\n\
         3. 一段两三句话的强化引言，放在最后，用 `<!--intro-->` 单独一行开头标记，\
         用于替换文档开头的引言。",
        title = outline.title_cn,
    )
}

/// Split the conclusion output into the closing section and the enriched
/// introduction (marked with `<!--intro-->`).
pub fn split_conclusion(raw: &str) -> (String, Option<String>) {
    match raw.split_once("<!--intro-->") {
        Some((closing, intro)) => {
            let intro = intro.trim();
            (
                closing.trim_end().to_string(),
                (!intro.is_empty()).then(|| intro.to_string()),
            )
        }
        None => (raw.trim_end().to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline() -> Outline {
        Outline {
            title_cn: "深入浅出".to_string(),
            introduction: "引言。".to_string(),
            chapters: vec![
                ChapterPlan {
                    id: 1,
                    title: "起点".to_string(),
                    summary: "概要一".to_string(),
                },
                ChapterPlan {
                    id: 2,
                    title: "演进".to_string(),
                    summary: "概要二".to_string(),
                },
            ],
        }
    }

    #[test]
    fn outline_prompt_inlines_text_sources() {
        let prompt = outline_prompt(
            &SourceContent::Text {
                text: "材料正文".to_string(),
            },
            Some("My Talk"),
        );
        assert!(prompt.contains("材料正文"));
        assert!(prompt.contains("My Talk"));
    }

    #[test]
    fn multimodal_sources_are_referenced_not_inlined() {
        let prompt = outline_prompt(
            &SourceContent::Multimodal {
                file_ref: "files/abc".to_string(),
                mime: "application/pdf".to_string(),
            },
            None,
        );
        assert!(prompt.contains("附件"));
        assert!(!prompt.contains("files/abc"));
    }

    #[test]
    fn chapter_prompt_names_its_chapter_and_siblings() {
        let outline = outline();
        let prompt = chapter_prompt(
            &outline,
            &outline.chapters[1],
            &SourceContent::Text {
                text: "x".to_string(),
            },
        );
        assert!(prompt.contains("第 2 章"));
        assert!(prompt.contains("1. 起点"));
        assert!(prompt.contains("## 演进"));
    }

    #[test]
    fn split_conclusion_extracts_the_enriched_intro() {
        let raw = "## 洞见与启发\n- 一\n\n<!--intro-->\n更好的引言。";
        let (closing, intro) = split_conclusion(raw);
        assert_eq!(closing, "## 洞见与启发\n- 一");
        assert_eq!(intro.as_deref(), Some("更好的引言。"));

        let (closing, intro) = split_conclusion("没有标记");
        assert_eq!(closing, "没有标记");
        assert!(intro.is_none());
    }
}
