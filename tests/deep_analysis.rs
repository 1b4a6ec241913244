// tests/deep_analysis.rs
use rss_digest::analyze::ai_adapter::MockCompletionClient;
use rss_digest::analyze::deep_analysis::parse_analysis;
use rss_digest::analyze::{render_report, AnalysisError, DeepAnalyzer, ReportOptions, StageProfile};
use rss_digest::ingest::types::FeedItem;

const BODY: &str = r#"{
  "summary_section": {"title": "Storage week", "insight": "Rust keeps eating infrastructure.", "trends": ["LSM rewrites", "io_uring"]},
  "categories": [
    {"name": "Databases", "icon": "🗄️", "level": 5, "description": "Engines and internals",
     "articles": [
       {"article_id": 1, "reason": "Deep dive", "tags": ["rust", "lsm"]},
       {"article_id": 0, "reason": "bogus"},
       {"article_id": 2, "reason": "Useful follow-up"},
       {"article_id": 7, "reason": "hallucinated"}
     ]}
  ]
}"#;

fn items(n: usize) -> Vec<FeedItem> {
    (1..=n)
        .map(|i| FeedItem::new(&format!("g{i}"), &format!("Article {i}"), &format!("https://x/{i}"), "excerpt", None))
        .collect()
}

fn profile() -> StageProfile {
    StageProfile {
        model: "gpt-4o".into(),
        system_prompt: "Group and explain.".into(),
        max_tokens: 8000,
        temperature: 0.3,
    }
}

#[test]
fn fenced_reply_parses_like_the_bare_object() {
    let bare = parse_analysis(BODY, 3).unwrap();
    let fenced = parse_analysis(&format!("```json\n{BODY}\n```"), 3).unwrap();
    let prose = parse_analysis(&format!("Here you go:\n\n```JSON\n{BODY}\n```\n\nLet me know!"), 3).unwrap();
    assert_eq!(bare, fenced);
    assert_eq!(bare, prose);
}

#[test]
fn out_of_range_refs_are_dropped_and_the_rest_render() {
    let analysis = parse_analysis(BODY, 3).unwrap();
    let ids: Vec<usize> = analysis.categories[0].articles.iter().map(|a| a.article_id).collect();
    assert_eq!(ids, vec![1, 2]);

    let md = render_report(&analysis, &items(3), &ReportOptions::default());
    assert!(md.contains("### [Article 1](https://x/1)"));
    assert!(md.contains("### [Article 2](https://x/2)"));
    assert!(!md.contains("Article 3"));
    assert!(!md.contains("bogus"));
    assert!(!md.contains("hallucinated"));
}

#[test]
fn no_valid_reference_left_is_malformed() {
    let reply = r#"{"categories": [{"name": "Ghosts", "articles": [{"article_id": 9}]}]}"#;
    assert!(matches!(parse_analysis(reply, 2), Err(AnalysisError::Malformed(_))));
}

#[test]
fn unparseable_reply_is_reported_as_such() {
    assert!(matches!(
        parse_analysis("The articles are all great.", 2),
        Err(AnalysisError::Unparseable { .. })
    ));
}

#[tokio::test]
async fn analyzer_sends_full_text_when_present() {
    let enriched = vec![
        FeedItem::new("g1", "Article 1", "https://x/1", "short excerpt", None).with_full_text("the whole article", 100),
        FeedItem::new("g2", "Article 2", "https://x/2", "only the excerpt", None),
    ];
    let client = MockCompletionClient::new().reply(BODY);
    let analysis = DeepAnalyzer::new(profile()).analyze(&client, &enriched).await.unwrap();
    assert!(analysis.is_digest());
    assert_eq!(analysis.article_count(), 2);

    let reqs = client.requests();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].model, "gpt-4o");
    assert_eq!(reqs[0].max_tokens, 8000);
    assert!(reqs[0].user.contains("[Article 1]\nTitle: Article 1"));
    assert!(reqs[0].user.contains("Content: the whole article"));
    assert!(reqs[0].user.contains("Content: only the excerpt"));
}

#[tokio::test]
async fn analyzer_refuses_empty_input() {
    let client = MockCompletionClient::new();
    let res = DeepAnalyzer::new(profile()).analyze(&client, &[]).await;
    assert!(matches!(res, Err(AnalysisError::EmptyInput)));
    assert!(client.requests().is_empty());
}
