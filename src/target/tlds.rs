//! Top-level domains accepted for scheme-less targets.

const COUNTRY_CODES: &str = "\
    ac ad ae af ag ai al am ao aq ar as at au aw ax az ba bb bd be bf bg bh bi bj bm bn bo \
    br bs bt bw by bz ca cc cd cf cg ch ci ck cl cm cn co cr cu cv cw cx cy cz de dj dk dm \
    do dz ec ee eg er es et eu fi fj fk fm fo fr ga gb gd ge gf gg gh gi gl gm gn gp gq gr \
    gs gt gu gw gy hk hm hn hr ht hu id ie il im in io iq ir is it je jm jo jp ke kg kh ki \
    km kn kp kr kw ky kz la lb lc li lk lr ls lt lu lv ly ma mc md me mg mh mk ml mm mn mo \
    mp mq mr ms mt mu mv mw mx my mz na nc ne nf ng ni nl no np nr nu nz om pa pe pf pg ph \
    pk pl pm pn pr ps pt pw py qa re ro rs ru rw sa sb sc sd se sg sh si sk sl sm sn so sr \
    ss st su sv sx sy sz tc td tf tg th tj tk tl tm tn to tr tt tv tw tz ua ug uk us uy uz \
    va vc ve vg vi vn vu wf ws ye yt za zm zw";

const GENERIC: &str = "\
    com net org edu gov mil int arpa info biz name pro aero asia cat coop jobs mobi museum \
    post tel travel xxx academy agency app art audio bank bar beer best bike bio blog book \
    build business buzz cafe camera camp capital care careers center chat city cloud club \
    codes coffee community company computer consulting cool dating deals design dev \
    digital direct directory download earth education email energy engineering enterprises \
    equipment estate events exchange expert express farm fashion finance fit fitness fm \
    foundation free fun fund games garden gift global gmbh gold golf google graphics green \
    group guide guru health help host house how inc industries institute international \
    investments jetzt kim land lgbt life live llc link london love ltd management market \
    marketing media menu moe money movie music network news ngo ninja nyc one online \
    ooo page partners party photo photography photos pics pink pizza place plus press \
    productions properties pub recipes red rentals repair report rest review rocks run \
    sale school science services sexy shoes shop show singles site social software \
    solutions space store studio style support systems tattoo team tech technology tips \
    today tools top town toys trade training tv university uno vacations ventures video \
    vip vision wang watch website wedding wiki win wine work works world wtf xyz yoga \
    zone";

/// Returns true for a known top-level domain or an internationalized (`xn--`) one.
pub(super) fn is_known(tld: &str) -> bool {
    let tld = tld.to_ascii_lowercase();
    tld.starts_with("xn--")
        || COUNTRY_CODES.split_whitespace().any(|known| known == tld)
        || GENERIC.split_whitespace().any(|known| known == tld)
}
