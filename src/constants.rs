//! Shared constants/setters for things
//!

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Number of scenes in one advertising narrative.
pub const SCENE_COUNT: usize = 18;

/// The default place we put generated images and reports
pub static OUTPUT_DIR: LazyLock<PathBuf> = LazyLock::new(|| PathBuf::from("./generated_images"));

/// The default place we put scene files
pub static SCENES_DIR: LazyLock<PathBuf> = LazyLock::new(|| PathBuf::from("./scenes"));

/// Pause between consecutive image API calls. 12 seconds keeps us at five
/// images per minute.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(12);

/// Rounds of the retry pass over failed scenes.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Concurrent row analysis requests in flight.
pub const DEFAULT_ROW_CONCURRENCY: usize = 8;

/// Columns added to a sheet when a new result column doesn't fit.
pub const SHEET_COLUMN_GROWTH: usize = 10;

/// Filename of the JSON generation report inside the output directory.
pub const REPORT_FILENAME: &str = "generation_report.json";

/// Models offered for scene writing; the first is the default.
pub const SCENE_MODELS: [&str; 3] = ["gpt-4o-mini", "gpt-4o", "gpt-3.5-turbo"];

/// Models offered for image rendering; the first is the default.
pub const IMAGE_MODELS: [&str; 2] = ["dall-e-3", "dall-e-2"];

/// Accepted image sizes.
pub const IMAGE_SIZES: [&str; 3] = ["1024x1024", "1792x1024", "1024x1792"];

/// Accepted image qualities.
pub const IMAGE_QUALITIES: [&str; 2] = ["standard", "hd"];

/// Accepted image styles.
pub const IMAGE_STYLES: [&str; 2] = ["vivid", "natural"];

/// Default model for spreadsheet row analysis.
pub const DEFAULT_ANALYSIS_MODEL: &str = "gpt-4o-mini";

/// Max age (in seconds) for image cache entries.
pub const IMAGE_CACHE_MAX_AGE_SECONDS: u64 = 60;

/// Cache-Control value for image responses. Images can be regenerated at any
/// time, so browsers revalidate quickly.
pub static IMAGE_CACHE_CONTROL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "private, max-age={}, must-revalidate",
        IMAGE_CACHE_MAX_AGE_SECONDS
    )
});

/// Idle minutes before a browser session (and its flash message) expires.
pub const SESSION_IDLE_MINUTES: i64 = 60;

/// Example narrative shown on the home page.
pub const EXAMPLE_NARRATIVE: &str = "눈 앞에 날파리가 떠다니는 거슬리는 비문증, 2주만에 싹 말끔해질 줄 누가 알았겠어요?
비문증 방치하면 실명될 수도 있다고 해서 치료 받아야하나 하던 차에 친구가 이거 한번 먹어보라 하더라고요. 그냥 하루에 한 알씩 챙겨 먹기 시작했는데 날파리 갯수가 점점 줄어들면서 시야가 맑아지는게 느껴지더라고요
그래서 약사 선생님한테 이거 괜찮냐고 물어봤더니 요즘 비문증 있는 사람들 사이에서는 유명한 제품이라네요.
일단 국내 최초로 루테인, 아스타잔틴, 지아잔틴을 배합해서 만든 비문증 개선 특허 성분이 들어있는데, 이게 유리체에 쌓인 찌꺼기를 싹 다 녹여 없애주고 노화로 약해진 망막도 개선시켜준다고 하더라구요.
병원가도 치료 못하는거라고 해서 포기해야하나 했는데, 이거 한알씩만 먹으면 해결된다는걸 이제야 알아서 허무하네요..
약국에서는 항상 품절상태일 정도로 인기 많아서 구하기 힘들다던데 지금 운좋게 소량입고 돼서 쟁여놨네요.
효과 없으면 100% 환불에 지금 34% 할인까지 한다니까 비문증 때문에 고생하고 계시다면 할인할 때 싸게 사세요";
