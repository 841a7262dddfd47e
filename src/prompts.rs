//! Prompt templates for the scene writer and the image model.

use serde_json::{Map, Value, json};

use crate::constants::SCENE_COUNT;
use crate::scenes::{SceneIndex, SceneSet};

/// Instructions for turning a narrative into 18 scenes. The copy targets
/// Korean advertising webtoons, so the rules are written in Korean.
pub fn scene_writer_instructions() -> &'static str {
    r#"광고 웹툰용 18개 씬 생성 전문가입니다.

Script 규칙:
- 간결하고 핵심적인 대사만 작성 (한 문장 또는 짧은 구문)
- 1인칭 체험담 ("~더라고요", "~했는데", "~네요")
- 자연스러운 연결어 ("그래서", "그냥", "일단")
- 홀수 씬(1,3,5,7,9,11,13,15,17): 미완성 문장 ("~는데", "~해서", "~더니", "~니까")
- 짝수 씬(2,4,6,8,10,12,14,16,18): 완성 문장 ("~더라고요", "~네요", "~겠어요?", "~세요")

18개 씬 구조:
1-3: 문제+충격 발견 | 4-6: 해결책+시작 | 7-11: 검증+설명 | 12-13: 감정반전 | 14-17: 구매유도

Main_keyword: 띄어쓰기 없는 복합어 (예: "날파리떠다니는시야", "친구추천충격")

Return JSON that matches the provided schema: an object `scenes` with keys scene_1 through scene_18."#
}

/// Strict JSON schema for the scene writer's structured output. Every
/// `scene_<N>` key is required so the model can't drop one.
pub fn scene_set_schema() -> Value {
    let scene_schema = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "script": {"type": "string", "description": "Scene dialogue/script text"},
            "main_keyword": {"type": "string", "description": "Main keyword for image generation"}
        },
        "required": ["script", "main_keyword"]
    });

    let mut properties = Map::new();
    let mut required = Vec::with_capacity(SCENE_COUNT);
    for index in SceneIndex::all() {
        properties.insert(index.key(), scene_schema.clone());
        required.push(Value::String(index.key()));
    }

    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "scenes": {
                "type": "object",
                "additionalProperties": false,
                "properties": properties,
                "required": required
            }
        },
        "required": ["scenes"]
    })
}

/// The full image prompt for one scene: house style, story context and the
/// scene itself.
pub fn scene_image_prompt(scenes: &SceneSet, index: SceneIndex) -> String {
    scene_image_prompt_with_context(&scenes.story_context(), scenes, index)
}

/// Same as [`scene_image_prompt`] with a precomputed story context, for
/// batches that build the context once.
pub fn scene_image_prompt_with_context(
    story_context: &str,
    scenes: &SceneSet,
    index: SceneIndex,
) -> String {
    let scene = scenes.get(index);
    format!(
        r#"Create a webtoon/manhwa style illustration for scene {index} of an advertising comic.

CONTEXT - Full Story Flow:
{story_context}
CURRENT SCENE ({index}):
Script: {script}
Main Keyword: {keyword}

VISUAL REQUIREMENTS:
- Korean webtoon/manhwa art style with clean lines and vibrant colors
- Single panel comic book illustration
- Character should be relatable Korean person (20s-40s)
- Focus on the emotion and situation described in the script
- Include visual elements that match the main keyword
- Composition should work well in vertical mobile format
- Use appropriate lighting and mood for the scene's emotional tone
- Show clear facial expressions and body language
- Include relevant background elements that support the story

SCENE POSITION CONTEXT:
- This is scene {index} out of {SCENE_COUNT} total scenes
- Maintain visual consistency with the overall advertising narrative
- Character appearance should be consistent throughout the story

Style: Clean Korean webtoon art, professional quality, detailed illustration, expressive characters, advertising comic aesthetic."#,
        script = scene.script,
        keyword = scene.main_keyword,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenes::fixtures::scene_set;

    #[test]
    fn schema_requires_every_scene() {
        let schema = scene_set_schema();
        let required = schema["properties"]["scenes"]["required"]
            .as_array()
            .expect("required list");
        assert_eq!(required.len(), 18);
        assert_eq!(required[0], "scene_1");
        assert_eq!(required[17], "scene_18");
        assert_eq!(
            schema["properties"]["scenes"]["properties"]["scene_9"]["required"],
            json!(["script", "main_keyword"])
        );
    }

    #[test]
    fn image_prompt_mentions_scene_and_context() {
        let scenes = scene_set();
        let index = SceneIndex::new(5).expect("index");
        let prompt = scene_image_prompt(&scenes, index);
        assert!(prompt.contains("scene 5 of an advertising comic"));
        assert!(prompt.contains("Script: script 5"));
        assert!(prompt.contains("Main Keyword: keyword5"));
        assert!(prompt.contains("scene 5 out of 18 total scenes"));
        assert!(prompt.contains("Scene 18: script 18"));
    }
}
