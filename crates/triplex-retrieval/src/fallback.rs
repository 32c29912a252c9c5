//! Static fallback shots
//!
//! Hand-authored worked examples used when the indexes yield fewer
//! candidates than the prompt budget. One of them has an empty output so
//! the model also sees that "nothing to extract" is a valid answer.

use once_cell::sync::Lazy;

use triplex_core::{ExampleRow, Mention, ShotPair, Triple};

static FALLBACK_POOL: Lazy<Vec<ShotPair>> = Lazy::new(|| {
    vec![
        ExampleRow::new(
            "邯郸银行股份有限公司党委书记、董事长郑志瑛，秦皇岛市海港区北环路街道军工里社区党委书记、\
             居民委员会主任孙爱静，保定市民族学校校长马惠斌，张家口市怀来县王家楼回族乡委员会宣传委员、\
             统战委员梁洪梅，新乐市彭家庄回族乡党委书记牛永辉等5位模范代表出席见面会，现场讲述推动民族团结进步的感人事迹",
        )
        .with_schema(["注册资本", "祖籍", "董事长", "首都"])
        .with_coarse_types(["医学", "组织机构", "产品", "人", "时间"])
        .with_triple(Triple::new(
            Mention::new("邯郸银行", "组织机构", "公司"),
            "董事长",
            Mention::new("郑志瑛", "人", "企业家"),
        ))
        .to_shot_pair(),
        ExampleRow::new(
            "GOALS -- Above all , protecting autonomous status of northern Iraq , which Americans \
             established with air protection in 1991 ; keeping militia intact ; regional control over \
             oil resources ; inclusion of Kirkuk , an oil center , in their autonomous region .",
        )
        .with_schema(["country of capital", "geographic distribution"])
        .with_coarse_types(["medicine", "economics"])
        .to_shot_pair(),
        ExampleRow::new(
            "杰里·贝勒斯（Jerryd Bayless），1988年8月20日出生于美国亚利桑那州菲尼克斯（Phoenix, Arizona），\
             美国职业篮球运动员，司职后卫，效力于NBA费城76人队",
        )
        .with_schema(["丈夫", "朝代", "祖籍", "国籍"])
        .with_coarse_types(["人", "产品", "位置", "时间", "组织机构"])
        .with_triple(Triple::new(
            Mention::new("杰里·贝勒斯", "人", "运动员"),
            "国籍",
            Mention::new("美国", "位置", "国家"),
        ))
        .to_shot_pair(),
    ]
});

/// The built-in fallback pool, in priority order
pub fn fallback_pool() -> &'static [ShotPair] {
    &FALLBACK_POOL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_contents() {
        let pool = fallback_pool();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool[0].output[0]["relationship"], "董事长");
        assert!(pool[1].output.is_empty());
        assert_eq!(pool[2].output[0]["object"][0], "美国");
    }

    #[test]
    fn test_sentences_have_no_line_breaks() {
        for pair in fallback_pool() {
            assert!(!pair.input.sentence.contains('\n'));
            assert!(!pair.input.sentence.contains("  "));
        }
    }
}
